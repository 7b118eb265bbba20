use ambient_core::error::{CapturedError, MaybeError, SequenceError};
use ambient_core::{Maybe, MaybeIteratorExt, MaybeSequenceExt};
use std::cell::Cell;

#[derive(Debug, thiserror::Error)]
#[error("parse failed: {0}")]
struct ParseFailure(String);

fn parse(input: &str) -> Result<i32, ParseFailure> {
    input
        .parse()
        .map_err(|_| ParseFailure(input.to_string()))
}

#[test]
fn test_value_and_empty_states() {
    let value = Maybe::some(3);
    assert!(value.has_value());
    assert!(!value.is_exception());
    assert_eq!(*value.value().unwrap(), 3);

    let empty = Maybe::<i32>::no_value();
    assert!(!empty.has_value());
    assert!(!empty.is_exception());
    assert_eq!(empty, Maybe::default());
}

#[test]
fn test_no_value_access_names_the_type() {
    let err = Maybe::<String>::no_value().into_value().unwrap_err();
    assert!(matches!(err, MaybeError::NoValueAccess { .. }));
    assert!(err.to_string().contains("String"));
}

#[test]
fn test_capture_holds_the_error_until_asked() {
    let parsed = Maybe::capture(|| parse("nope"));
    assert!(parsed.is_exception());
    assert!(!parsed.has_value());

    let err = parsed.clone().throw_on_exception().unwrap_err();
    assert_eq!(err.to_string(), "parse failed: nope");
    assert!(err.downcast_ref::<ParseFailure>().is_some());

    match parsed.value() {
        Err(MaybeError::Captured(captured)) => {
            assert_eq!(captured.to_string(), "parse failed: nope");
        }
        other => panic!("Expected captured error, got {other:?}"),
    }
}

#[test]
fn test_throw_on_exception_passes_other_states_through() {
    assert_eq!(Maybe::some(1).throw_on_exception().unwrap(), Maybe::some(1));
    assert_eq!(
        Maybe::<i32>::no_value().throw_on_exception().unwrap(),
        Maybe::NoValue
    );
}

#[test]
fn test_throw_on_no_value_uses_caller_error() {
    let err = Maybe::<i32>::no_value()
        .throw_on_no_value(|| "missing")
        .unwrap_err();
    assert_eq!(err, "missing");

    let kept = Maybe::some(9).throw_on_no_value(|| "missing").unwrap();
    assert_eq!(kept, Maybe::some(9));

    // Exceptions are not the "no value" case.
    let exception = Maybe::<i32>::Exception(CapturedError::from_message("boom"));
    assert!(exception.throw_on_no_value(|| "missing").unwrap().is_exception());
}

#[test]
fn test_select_never_calls_mapper_without_value() {
    let calls = Cell::new(0);
    let mapper = |x: i32| {
        calls.set(calls.get() + 1);
        x * 10
    };

    assert_eq!(Maybe::some(2).select(mapper), Maybe::some(20));
    assert!(!Maybe::<i32>::no_value().select(mapper).has_value());
    assert!(Maybe::capture(|| parse("x")).select(mapper).is_exception());
    assert_eq!(calls.get(), 1);
}

#[test]
fn test_select_maybe_chains_fallible_steps() {
    let chained = Maybe::some("41")
        .select_maybe(|text| Maybe::capture(|| parse(text)))
        .select(|n| n + 1);
    assert_eq!(chained, Maybe::some(42));

    let failed = Maybe::some("x").select_maybe(|text| Maybe::capture(|| parse(text)));
    assert!(failed.is_exception());
}

#[test]
fn test_or_and_value_or_default() {
    assert_eq!(Maybe::some(1).or(Maybe::some(2)), Maybe::some(1));
    assert_eq!(Maybe::no_value().or(Maybe::some(2)), Maybe::some(2));
    assert_eq!(Maybe::<i32>::no_value().value_or_default(7), 7);
    assert_eq!(Maybe::some(3).value_or_default(7), 3);

    let fallback_ran = Cell::new(false);
    let value = Maybe::some(5).value_or_else(|| {
        fallback_ran.set(true);
        0
    });
    assert_eq!(value, 5);
    assert!(!fallback_ran.get());

    let alternative = Maybe::some(5).or_else(|| {
        fallback_ran.set(true);
        Maybe::some(0)
    });
    assert_eq!(alternative, Maybe::some(5));
    assert!(!fallback_ran.get());
}

#[test]
fn test_filter_and_if_value() {
    assert_eq!(Maybe::some(4).filter(|n| n % 2 == 0), Maybe::some(4));
    assert_eq!(Maybe::some(3).filter(|n| n % 2 == 0), Maybe::NoValue);

    let seen = Cell::new(0);
    let passed = Maybe::some(8).if_value(|n| seen.set(*n));
    assert_eq!(passed, Maybe::some(8));
    assert_eq!(seen.get(), 8);

    Maybe::<i32>::no_value().if_value(|_| seen.set(-1));
    assert_eq!(seen.get(), 8);
}

#[test]
fn test_conversions() {
    assert_eq!(Maybe::from(Some(1)), Maybe::some(1));
    assert_eq!(Maybe::<i32>::from(None), Maybe::NoValue);
    assert_eq!(Option::<&str>::from(Maybe::some("a")), Some("a"));
    assert_eq!(Option::<i32>::from(Maybe::capture(|| parse("z"))), None);

    let from_ok: Maybe<i32> = parse("12").into();
    assert_eq!(from_ok, Maybe::some(12));
    let from_err: Maybe<i32> = parse("twelve").into();
    assert!(from_err.is_exception());
}

#[test]
fn test_display() {
    assert_eq!(Maybe::some(5).to_string(), "5");
    assert_eq!(Maybe::<i32>::no_value().to_string(), "<no value>");
    assert_eq!(
        Maybe::<i32>::Exception(CapturedError::from_message("bad")).to_string(),
        "<exception: bad>"
    );
}

#[test]
fn test_json_uses_option_shape() {
    assert_eq!(serde_json::to_string(&Maybe::some(3)).unwrap(), "3");
    assert_eq!(serde_json::to_string(&Maybe::<i32>::no_value()).unwrap(), "null");

    let parsed: Vec<Maybe<u8>> = serde_json::from_str("[1, null, 3]").unwrap();
    assert_eq!(parsed, vec![Maybe::some(1), Maybe::NoValue, Maybe::some(3)]);

    let exception = Maybe::<i32>::Exception(CapturedError::from_message("bad"));
    assert!(serde_json::to_string(&exception).is_err());
}

#[test]
fn test_sequence_helpers() {
    let numbers = vec![3, 8, 5, 12];
    assert_eq!(numbers.iter().copied().first_maybe(), Maybe::some(3));
    assert_eq!(numbers.iter().copied().last_maybe(), Maybe::some(12));
    assert_eq!(numbers.iter().copied().element_at_maybe(2), Maybe::some(5));
    assert_eq!(numbers.iter().copied().element_at_maybe(9), Maybe::NoValue);
    assert_eq!(
        numbers.iter().copied().first_where(|n| *n > 6),
        Maybe::some(8)
    );
    assert_eq!(
        numbers.iter().copied().first_where(|n| *n > 100),
        Maybe::NoValue
    );

    let many = numbers.iter().single_maybe();
    let err = many.exception().unwrap();
    assert_eq!(
        err.downcast_ref::<SequenceError>(),
        Some(&SequenceError::MoreThanOneElement)
    );
}

#[test]
fn test_values_drops_empty_and_exceptions() {
    let inputs = ["1", "two", "3"];
    let parsed: Vec<i32> = inputs
        .iter()
        .map(|text| Maybe::capture(|| parse(text)))
        .chain(std::iter::once(Maybe::NoValue))
        .values()
        .collect();
    assert_eq!(parsed, vec![1, 3]);
}

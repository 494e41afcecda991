//! Evaluates a [Value] into a result. Lazy values are loaded and closures are applied, while every
//! other value evaluates to itself.

use crate::error::{Error, ErrorKind, Result};
use crate::value::{Body, Value};

/// Takes no heap, since lazy values carry the heap they load from.
pub fn evaluate<'a>(value: &Value<'a>) -> Result<Value<'a>> {
    match value.body() {
        Body::Lazy(lazy) => evaluate(&lazy.resolve()?),
        Body::Closure(closure) => {
            let args = match &closure.value {
                Some(value) => match value.resolve()?.body() {
                    Body::Array(values) => values.to_vec(),
                    _ => vec![value.as_ref().clone()],
                },
                None => vec![],
            };

            let args = args.iter().map(evaluate).collect::<Result<Vec<_>>>()?;

            let function = closure.function;
            if !function.arity.accepts(args.len()) {
                return Err(Error::owned(
                    ErrorKind::User,
                    format!(
                        "wrong arity for {}, expected {} arguments, got {}",
                        function.name,
                        function.arity.packed(),
                        args.len()
                    ),
                ));
            }

            function.call(&args)
        }
        _ => Ok(value.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::{Arity, Function};

    fn sum<'a>(args: &[Value<'a>]) -> Result<Value<'a>> {
        let mut total: i64 = 0;
        for arg in args {
            let integer = arg
                .as_number()
                .ok_or(Error::borrowed(ErrorKind::User, "expected a number"))?;
            total = total.wrapping_add(integer);
        }
        Ok(Value::number(total))
    }

    fn negate<'a>(args: &[Value<'a>]) -> Result<Value<'a>> {
        match args[0].as_number() {
            Some(integer) => Ok(Value::number(-integer)),
            None => Err(Error::borrowed(ErrorKind::User, "expected a number")),
        }
    }

    static SUM: Function = Function {
        name: "sum",
        arity: Arity::Any,
        pointer: sum,
    };

    static NEGATE: Function = Function {
        name: "negate",
        arity: Arity::Exactly(1),
        pointer: negate,
    };

    #[test]
    fn plain_values_evaluate_to_themselves() {
        let value = Value::link(Value::number(1), Value::symbol("x"));
        assert_eq!(evaluate(&value).unwrap(), value);
    }

    #[test]
    fn closures_spread_enclosed_arrays() {
        let closure = Value::closure(
            &SUM,
            Some(Value::array([Value::number(1), Value::number(2), Value::number(3)])),
        );
        assert_eq!(evaluate(&closure).unwrap(), Value::number(6));
        assert_eq!(
            evaluate(&Value::closure(&SUM, None)).unwrap(),
            Value::number(0)
        );
    }

    #[test]
    fn arguments_are_evaluated_first() {
        let inner = Value::closure(&NEGATE, Some(Value::number(4)));
        let outer = Value::closure(&SUM, Some(Value::array([inner, Value::number(10)])));
        assert_eq!(evaluate(&outer).unwrap(), Value::number(6));
    }

    #[test]
    fn arity_is_checked() {
        let closure = Value::closure(
            &NEGATE,
            Some(Value::array([Value::number(1), Value::number(2)])),
        );
        let error = evaluate(&closure).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::User);
        assert_eq!(
            error.message(),
            Some("wrong arity for negate, expected 1 arguments, got 2")
        );
    }
}

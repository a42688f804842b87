use std::fmt;

use serde_json::Value;

use super::operation::{Operation, Params};
use crate::core::options::CallOptions;
use crate::txn::tracker::BoxedCallback;
use crate::TxnError;

/// Completion callback of a data operation; receives the operation's result.
pub type Callback = BoxedCallback<Result<Value, TxnError>>;

/// One positional argument of a dynamically dispatched call.
pub enum Arg {
    Value(Value),
    Options(CallOptions),
    Callback(Callback),
}

impl Arg {
    pub fn callback<F>(callback: F) -> Arg
    where
        F: FnOnce(Result<Value, TxnError>) -> Result<(), TxnError> + Send + 'static,
    {
        Arg::Callback(Box::new(callback))
    }
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Arg::Value(value)
    }
}

impl From<CallOptions> for Arg {
    fn from(options: CallOptions) -> Self {
        Arg::Options(options)
    }
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Arg::Options(o) => f.debug_tuple("Options").field(o).finish(),
            Arg::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

pub(crate) struct SplitArgs {
    pub params: Params,
    pub options: Option<CallOptions>,
    pub callback: Option<Callback>,
}

#[derive(PartialEq, PartialOrd)]
enum Position {
    Business,
    Options,
    Callback,
}

/// Locate business values, options and callback in `args` for `op`.
///
/// Arguments must appear in that order; options and callback are told apart
/// by type, so a lone callback needs no placeholder options.
pub(crate) fn split_args(op: Operation, args: Vec<Arg>) -> Result<SplitArgs, TxnError> {
    let operation = op.name();
    if args.len() > op.max_args() {
        return Err(TxnError::ArgumentCount {
            operation,
            max: op.max_args(),
            got: args.len(),
        });
    }

    let invalid = |reason: &str| TxnError::InvalidArguments {
        operation,
        reason: reason.to_string(),
    };

    let arity = op.arity().count();
    let mut position = Position::Business;
    let mut values = Vec::with_capacity(arity);
    let mut options = None;
    let mut callback = None;

    for arg in args {
        match arg {
            Arg::Value(value) => {
                if position != Position::Business {
                    return Err(invalid("positional value after options or callback"));
                }
                if values.len() == arity {
                    return Err(invalid(&format!(
                        "expected options or callback after {arity} positional values"
                    )));
                }
                values.push(value);
            }
            Arg::Options(opts) => {
                if position >= Position::Options {
                    return Err(invalid("options must come once, before the callback"));
                }
                position = Position::Options;
                options = Some(opts);
            }
            Arg::Callback(cb) => {
                if !op.accepts_callback() {
                    return Err(invalid("operation does not accept a callback"));
                }
                if position == Position::Callback {
                    return Err(invalid("more than one callback"));
                }
                position = Position::Callback;
                callback = Some(cb);
            }
        }
    }

    Ok(SplitArgs {
        params: Params::from_values(op.arity(), values),
        options,
        callback,
    })
}

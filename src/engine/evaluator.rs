//! # Script Runtime Bridge
//!
//! Runs the configured evaluation script against a cache snapshot. A fresh
//! `mlua::Lua` state is built for every cycle so no state survives from a
//! prior run; the only input a script sees is the global table `mt`
//! (topic -> numeric value) re-injected from the snapshot.
//!
//! The script contract is fixed-arity: exactly three return values,
//! `(resultTopic: string, resultValue: number, unit: string)`, with Lua's
//! usual string/number coercions applied. Stale topics are simply absent
//! from `mt`; the configurator-generated scripts raise a Lua error when no
//! inputs remain ("all sensors lost"), which surfaces here as an ordinary
//! [`EvalError::Script`], never as a panic or a loop abort.

use mlua::{Lua, MultiValue, Value};
use std::collections::HashMap;
use thiserror::Error;

/// Name of the global input table visible to evaluation scripts.
const INPUT_TABLE: &str = "mt";

/// A failed evaluation cycle. All variants are recoverable: the actor logs
/// them, skips publication, and keeps processing events.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// The script raised an error or failed to compile.
    #[error("script error: {0}")]
    Script(String),

    /// The script returned a number of values other than three.
    #[error("expected 3 return values, got {0}")]
    Arity(usize),

    /// A return value could not be coerced to the expected type.
    #[error("invalid return value: {0}")]
    Convert(String),
}

impl From<mlua::Error> for EvalError {
    fn from(err: mlua::Error) -> Self {
        EvalError::Script(format_lua_error(&err))
    }
}

/// Execute `script` against `inputs` in a freshly constructed interpreter.
///
/// Returns the `(topic, value, unit)` triple on success. The function is
/// stateless: two calls with equal inputs and script are equivalent.
pub fn evaluate(
    inputs: &HashMap<String, f64>,
    script: &str,
) -> Result<(String, f64, String), EvalError> {
    let lua = Lua::new();

    let mt = lua.create_table()?;
    for (topic, value) in inputs {
        mt.set(topic.as_str(), *value)?;
    }
    lua.globals().set(INPUT_TABLE, mt)?;

    let returned: MultiValue = lua.load(script).set_name("evaluation").eval()?;
    if returned.len() != 3 {
        return Err(EvalError::Arity(returned.len()));
    }

    let mut values = returned.into_iter();
    // `returned.len() == 3` above; the iterator cannot run dry here.
    let topic = coerce_string(&lua, values.next().unwrap_or(Value::Nil), "topic")?;
    let value = coerce_number(&lua, values.next().unwrap_or(Value::Nil), "value")?;
    let unit = coerce_string(&lua, values.next().unwrap_or(Value::Nil), "unit")?;

    Ok((topic, value, unit))
}

fn coerce_string(lua: &Lua, value: Value, which: &str) -> Result<String, EvalError> {
    let type_name = value.type_name();
    match lua.coerce_string(value) {
        Ok(Some(s)) => s
            .to_str()
            .map(|s| s.to_string())
            .map_err(|_| EvalError::Convert(format!("{which} is not valid UTF-8"))),
        _ => Err(EvalError::Convert(format!(
            "{which} is a {type_name}, expected a string"
        ))),
    }
}

fn coerce_number(lua: &Lua, value: Value, which: &str) -> Result<f64, EvalError> {
    let type_name = value.type_name();
    match lua.coerce_number(value) {
        Ok(Some(n)) => Ok(n),
        _ => Err(EvalError::Convert(format!(
            "{which} is a {type_name}, expected a number"
        ))),
    }
}

/// Unwrap mlua's error nesting down to the script's own message.
fn format_lua_error(err: &mlua::Error) -> String {
    match err {
        mlua::Error::RuntimeError(msg) => msg.clone(),
        mlua::Error::CallbackError { cause, .. } => format_lua_error(cause),
        mlua::Error::SyntaxError { message, .. } => format!("compile error: {message}"),
        _ => err.to_string(),
    }
}

use super::object::NativeFn;
use super::value::Value;
use std::time::{SystemTime, UNIX_EPOCH};

/// The native-function registry the VM installs as globals at startup: name,
/// arity, and function pointer. Limited to the one native this language
/// actually defines; richer native surfaces (lists, files, maps, random)
/// belong to a different language design than this one.
pub const NATIVES: &[(&str, u8, NativeFn)] = &[("clock", 0, native_clock)];

fn native_clock(_args: &[Value]) -> Result<Value, String> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| e.to_string())?;
    Ok(Value::Number(now.as_secs_f64()))
}

//! Host-backed native functions.

use std::io::Read;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::RuntimeError;
use crate::value::Value;

/// Dispatches a native call by name. Arity has already been checked.
pub fn call(name: &str, args: &[Value], line: u32) -> Result<Value, RuntimeError> {
    match name {
        "clock" => {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_err(|_| RuntimeError::new("Clock went backwards.", line))?;
            Ok(Value::Number(now.as_secs_f64()))
        }
        "read" => {
            // One byte from stdin; nil at end of input.
            let mut byte = [0u8; 1];
            match std::io::stdin().read(&mut byte) {
                Ok(1) => Ok(Value::Number(byte[0] as f64)),
                _ => Ok(Value::Nil),
            }
        }
        "utf" => {
            // Up to four byte values, nil-terminated, decoded as UTF-8.
            let mut bytes = Vec::with_capacity(args.len());
            for arg in args {
                match arg {
                    Value::Number(n) => bytes.push(*n as u8),
                    Value::Nil => break,
                    _ => {
                        return Err(RuntimeError::new("Operands must be numbers.", line));
                    }
                }
            }
            let text = String::from_utf8_lossy(&bytes).into_owned();
            Ok(Value::Str(Rc::from(text.as_str())))
        }
        "exit" => match args.first() {
            Some(Value::Number(code)) => std::process::exit(*code as i32),
            _ => Err(RuntimeError::new("Operand must be a number.", line)),
        },
        "printerr" => {
            match args.first() {
                Some(value) => eprintln!("{value}"),
                None => eprintln!(),
            }
            Ok(Value::Nil)
        }
        _ => Err(RuntimeError::new(format!("Unknown native '{name}'."), line)),
    }
}

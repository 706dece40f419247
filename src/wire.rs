//! JSON wire format for the control channel
//!
//! Every control message is one datagram holding one JSON object. Payload
//! data never rides the socket; it flows through pipes passed back to the
//! parent as ancillary data.

use crate::errors::ProxyError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Semantic version of the control protocol, returned by Initialize
pub const PROTOCOL_VERSION: &str = "0.2.1";

/// Hard limit on a single inbound control packet
pub const MAX_MSG_SIZE: usize = 32 * 1024;

/// ECMA Number.MAX_SAFE_INTEGER
///
/// Inbound JSON numbers we expect to be integers are rejected above this,
/// since the parent may round-trip them through a double.
pub const MAX_JSON_INTEGER: f64 = 9007199254740991.0;

/// One function call from the parent
#[derive(Clone, Debug, Deserialize)]
pub struct Request {
    /// Name of the function to invoke
    pub method: String,
    /// Positional arguments, validated inside each handler
    #[serde(default)]
    pub args: Vec<Value>,
}

/// Serialized back to the parent as the return value from a function call
#[derive(Clone, Debug, Default, Serialize)]
pub struct Reply {
    /// True if and only if the call succeeded
    pub success: bool,
    /// Arbitrary value returned from the call
    pub value: Value,
    /// Index into the open pipes, to be passed to FinishPipe; zero when the
    /// reply carries no pipe
    pub pipeid: u32,
    /// Non-empty exactly when success is false
    pub error: String,
}

pub fn check_args(args: &[Value], expected: usize) -> Result<(), ProxyError> {
    if args.len() != expected {
        return Err(ProxyError::WrongArgumentCount {
            expected,
            found: args.len(),
        });
    }
    Ok(())
}

/// Parse a JSON number as a non-negative integer within the safe range
pub fn parse_integer(v: &Value, what: &'static str) -> Result<u64, ProxyError> {
    let f = v.as_f64().ok_or(ProxyError::WrongArgumentType {
        expected: what,
        found: json_type_name(v),
    })?;
    if !(0.0..=MAX_JSON_INTEGER).contains(&f) {
        return Err(ProxyError::OutOfRangeInteger(f));
    }
    Ok(f as u64)
}

/// Parse a JSON number as a table id
pub fn parse_id(v: &Value, what: &'static str) -> Result<u32, ProxyError> {
    Ok(parse_integer(v, what)? as u32)
}

pub fn parse_string<'a>(v: &'a Value, what: &'static str) -> Result<&'a str, ProxyError> {
    v.as_str().ok_or(ProxyError::WrongArgumentType {
        expected: what,
        found: json_type_name(v),
    })
}

fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_decoding() {
        let req: Request = serde_json::from_str(r#"{"method":"Initialize","args":[]}"#).unwrap();
        assert_eq!(req.method, "Initialize");
        assert!(req.args.is_empty());

        // Unknown fields are ignored, missing args default to empty
        let req: Request =
            serde_json::from_str(r#"{"method":"Shutdown","unknown":{"a":1}}"#).unwrap();
        assert_eq!(req.method, "Shutdown");
        assert!(req.args.is_empty());

        assert!(serde_json::from_str::<Request>("{nope").is_err());
        assert!(serde_json::from_str::<Request>(r#"{"args":[]}"#).is_err());
    }

    #[test]
    fn reply_shape() {
        let reply = Reply {
            success: true,
            value: json!("0.2.1"),
            pipeid: 0,
            error: String::new(),
        };
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({ "success": true, "value": "0.2.1", "pipeid": 0, "error": "" })
        );
        assert_eq!(
            serde_json::to_value(&Reply::default()).unwrap(),
            json!({ "success": false, "value": null, "pipeid": 0, "error": "" })
        );
    }

    #[test]
    fn safe_integer_bounds() {
        assert_eq!(
            parse_integer(&json!(9007199254740991u64), "n").unwrap(),
            9007199254740991
        );
        assert!(matches!(
            parse_integer(&json!(9007199254740992u64), "n"),
            Err(ProxyError::OutOfRangeInteger(_))
        ));
        assert!(matches!(
            parse_integer(&json!(-1), "n"),
            Err(ProxyError::OutOfRangeInteger(_))
        ));
        assert!(parse_integer(&json!("5"), "n").is_err());
        assert_eq!(parse_integer(&json!(0), "n").unwrap(), 0);
    }

    #[test]
    fn argument_accessors() {
        assert!(check_args(&[], 0).is_ok());
        assert!(check_args(&[json!(1)], 0).is_err());
        assert_eq!(parse_id(&json!(7), "integer imageid").unwrap(), 7);
        assert!(parse_id(&json!(null), "integer imageid").is_err());
        assert_eq!(parse_string(&json!("ref"), "string imageref").unwrap(), "ref");
        assert!(parse_string(&json!(9), "string imageref").is_err());
    }
}

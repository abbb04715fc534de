//! Action building and response handling

use crate::{
    constants::{KEY_VALUE_SEPARATOR, LINE_TERMINATOR},
    error::{AmiError, AmiResult},
    headers::AmiHeader,
    protocol::AmiMessage,
};
use std::collections::HashMap;
use std::fmt;

/// Validate that a user-provided string contains no newline characters.
///
/// AMI frames are line-delimited; embedded newlines would allow injection
/// of arbitrary protocol frames.
fn validate_no_newlines(s: &str, context: &str) -> AmiResult<()> {
    if s.contains('\n') || s.contains('\r') {
        return Err(AmiError::protocol_error(format!(
            "{} must not contain newlines",
            context
        )));
    }
    Ok(())
}

/// An outbound AMI action: a name plus ordered parameters.
///
/// ```
/// use asterisk_ami_tokio::AmiAction;
///
/// let action = AmiAction::new("Originate")
///     .param("Channel", "PJSIP/100")
///     .param("Exten", "200");
/// assert_eq!(
///     action.to_wire_format().unwrap(),
///     "Action: Originate\r\nChannel: PJSIP/100\r\nExten: 200\r\n\r\n"
/// );
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct AmiAction {
    name: String,
    params: Vec<(String, String)>,
}

impl AmiAction {
    /// Start an action with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
        }
    }

    /// `Login` with the given credentials.
    pub fn login(username: &str, secret: &str) -> Self {
        Self::new("Login")
            .param(AmiHeader::Username, username)
            .param(AmiHeader::Secret, secret)
    }

    /// `Ping`, the keep-alive action.
    pub fn ping() -> Self {
        Self::new("Ping")
    }

    /// `Logoff`, asks the server to end the session.
    pub fn logoff() -> Self {
        Self::new("Logoff")
    }

    /// Append a parameter. Order is preserved on the wire; a repeated key is
    /// sent twice (AMI uses this for `Variable:` lists).
    pub fn param(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.params
            .push((key.as_ref().to_string(), value.into()));
        self
    }

    /// Append several parameters at once.
    pub fn params<K, V, I>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (k, v) in params {
            self = self.param(k, v);
        }
        self
    }

    /// Action name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// First value for a parameter key.
    pub fn get_param(&self, key: impl AsRef<str>) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key.as_ref())
            .map(|(_, v)| v.as_str())
    }

    /// `ActionID` parameter, if set.
    pub fn action_id(&self) -> Option<&str> {
        self.get_param(AmiHeader::ActionId)
    }

    /// Set `ActionID` unless the caller already supplied one.
    pub(crate) fn ensure_action_id(self, id: impl FnOnce() -> String) -> Self {
        if self
            .action_id()
            .is_some()
        {
            self
        } else {
            self.param(AmiHeader::ActionId, id())
        }
    }

    /// Encode to wire format: `Action:` line, one line per parameter in
    /// insertion order, blank-line terminator.
    pub fn to_wire_format(&self) -> AmiResult<String> {
        validate_no_newlines(&self.name, "action name")?;
        let mut result = String::new();
        push_line(&mut result, AmiHeader::Action.as_str(), &self.name);
        for (key, value) in &self.params {
            validate_no_newlines(key, "parameter name")?;
            validate_no_newlines(value, "parameter value")?;
            push_line(&mut result, key, value);
        }
        result.push_str(LINE_TERMINATOR);
        Ok(result)
    }
}

fn push_line(out: &mut String, key: &str, value: &str) {
    out.push_str(key);
    out.push_str(KEY_VALUE_SEPARATOR);
    out.push_str(value);
    out.push_str(LINE_TERMINATOR);
}

impl fmt::Debug for AmiAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<(&str, &str)> = self
            .params
            .iter()
            .map(|(k, v)| {
                if k.eq_ignore_ascii_case(AmiHeader::Secret.as_str()) {
                    (k.as_str(), "[REDACTED]")
                } else {
                    (k.as_str(), v.as_str())
                }
            })
            .collect();
        f.debug_struct("AmiAction")
            .field("name", &self.name)
            .field("params", &params)
            .finish()
    }
}

/// `Response` header classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ResponseStatus {
    /// `Response: Success`
    Success,
    /// `Response: Error`
    Error,
    /// `Response: Follows`, legacy command output follows in the frame.
    Follows,
    /// `Response: Goodbye`, the answer to `Logoff`.
    Goodbye,
    /// Missing or unrecognized `Response` value.
    Other,
}

impl ResponseStatus {
    fn classify(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("Success") => ResponseStatus::Success,
            Some(v) if v.eq_ignore_ascii_case("Error") => ResponseStatus::Error,
            Some(v) if v.eq_ignore_ascii_case("Follows") => ResponseStatus::Follows,
            Some(v) if v.eq_ignore_ascii_case("Goodbye") => ResponseStatus::Goodbye,
            _ => ResponseStatus::Other,
        }
    }
}

/// Reply to an action.
#[derive(Debug, Clone, PartialEq)]
pub struct AmiResponse {
    headers: HashMap<String, String>,
    raw: String,
    status: ResponseStatus,
}

impl AmiResponse {
    /// `ResponseStatus` is derived from the `Response` header.
    pub fn new(headers: HashMap<String, String>, raw: String) -> Self {
        let status = ResponseStatus::classify(
            headers
                .get(AmiHeader::Response.as_str())
                .map(|s| s.as_str()),
        );
        Self {
            headers,
            raw,
            status,
        }
    }

    /// `true` if `Response: Success`.
    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }

    /// Classification of the `Response` header.
    pub fn status(&self) -> ResponseStatus {
        self.status
    }

    /// Look up a response header by name.
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers
            .get(name.as_ref())
            .map(|s| s.as_str())
    }

    /// All response headers.
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// `Message` header (e.g. `Authentication accepted`).
    pub fn message(&self) -> Option<&str> {
        self.header(AmiHeader::Message)
    }

    /// `ActionID` echoed by the server.
    pub fn action_id(&self) -> Option<&str> {
        self.header(AmiHeader::ActionId)
    }

    /// The response frame exactly as received, without the blank-line
    /// terminator.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Consume into the raw frame text.
    pub fn into_raw(self) -> String {
        self.raw
    }

    /// Convert to result based on the response status.
    ///
    /// `Error` becomes [`AmiError::ActionFailed`] carrying the `Message`
    /// header; every other status is passed through.
    ///
    /// ```
    /// # use asterisk_ami_tokio::AmiResponse;
    /// # use std::collections::HashMap;
    /// let headers: HashMap<String, String> = [("Response".into(), "Success".into())].into();
    /// let resp = AmiResponse::new(headers, "Response: Success".into());
    /// assert!(resp.into_result().is_ok());
    /// ```
    pub fn into_result(self) -> AmiResult<Self> {
        match self.status {
            ResponseStatus::Error => {
                let message = self
                    .message()
                    .unwrap_or("Error")
                    .to_string();
                Err(AmiError::ActionFailed { message })
            }
            _ => Ok(self),
        }
    }
}

impl From<AmiMessage> for AmiResponse {
    fn from(message: AmiMessage) -> Self {
        AmiResponse::new(message.fields, message.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(pairs: &[(&str, &str)]) -> AmiResponse {
        let headers: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AmiResponse::new(headers, String::new())
    }

    #[test]
    fn test_action_wire_format() {
        let login = AmiAction::login("admin", "s3cret");
        assert_eq!(
            login
                .to_wire_format()
                .unwrap(),
            "Action: Login\r\nUsername: admin\r\nSecret: s3cret\r\n\r\n"
        );

        assert_eq!(
            AmiAction::ping()
                .to_wire_format()
                .unwrap(),
            "Action: Ping\r\n\r\n"
        );
    }

    #[test]
    fn test_params_keep_insertion_order() {
        let action = AmiAction::new("Setvar").params([("Variable", "X"), ("Value", "1"), ("Channel", "c")]);
        assert_eq!(
            action
                .to_wire_format()
                .unwrap(),
            "Action: Setvar\r\nVariable: X\r\nValue: 1\r\nChannel: c\r\n\r\n"
        );
    }

    #[test]
    fn test_newline_injection_rejected() {
        let bad_value = AmiAction::new("Command").param("Command", "core show\r\n\r\nAction: Logoff");
        assert!(bad_value
            .to_wire_format()
            .is_err());

        let bad_name = AmiAction::new("Ping\nAction: Logoff");
        assert!(bad_name
            .to_wire_format()
            .is_err());

        let bad_key = AmiAction::new("Getvar").param("Variable\r", "x");
        assert!(bad_key
            .to_wire_format()
            .is_err());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let login = AmiAction::login("admin", "s3cret");
        let debug_str = format!("{:?}", login);
        assert!(!debug_str.contains("s3cret"));
        assert!(debug_str.contains("admin"));
        assert!(debug_str.contains("REDACTED"));
    }

    #[test]
    fn test_ensure_action_id_keeps_existing() {
        let action = AmiAction::new("SIPpeers").param("ActionID", "mine");
        let action = action.ensure_action_id(|| "generated".to_string());
        assert_eq!(action.action_id(), Some("mine"));

        let action = AmiAction::new("SIPpeers").ensure_action_id(|| "generated".to_string());
        assert_eq!(action.action_id(), Some("generated"));
    }

    #[test]
    fn test_response_status() {
        assert_eq!(response(&[("Response", "Success")]).status(), ResponseStatus::Success);
        assert_eq!(response(&[("Response", "Error")]).status(), ResponseStatus::Error);
        assert_eq!(response(&[("Response", "Follows")]).status(), ResponseStatus::Follows);
        assert_eq!(response(&[("Response", "Goodbye")]).status(), ResponseStatus::Goodbye);
        assert_eq!(response(&[]).status(), ResponseStatus::Other);
    }

    #[test]
    fn test_into_result_error_carries_message() {
        let resp = response(&[("Response", "Error"), ("Message", "Permission denied")]);
        match resp.into_result() {
            Err(AmiError::ActionFailed { message }) => assert_eq!(message, "Permission denied"),
            other => panic!("expected ActionFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_into_result_passes_non_error() {
        assert!(response(&[("Response", "Success")])
            .into_result()
            .is_ok());
        assert!(response(&[("Response", "Goodbye")])
            .into_result()
            .is_ok());
    }
}

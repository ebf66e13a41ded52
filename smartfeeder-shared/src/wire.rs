//! Device poll wire codec.
//!
//! Feeders poll the server with an ASCII payload of `&`-joined
//! `key=value` pairs and get a short ASCII directive back. The format is
//! fixed by the deployed firmware, so both sides are reproduced here
//! byte-exact. There is no escaping: a value may contain `=` (everything
//! after the first one) but never `&`.
//!
//! Recognized keys:
//! - `u` product key (required)
//! - `p` credential (required)
//! - `f` food eaten since last report, integer grams (optional)
//! - `d` drop result: `"0"` success, `"1"` failure (optional)

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WireError {
    #[error("payload is not ASCII")]
    NotAscii,
    #[error("malformed pair (no '='): {0:?}")]
    MalformedPair(String),
}

/// A parsed device poll. All fields optional at this layer; requiredness
/// is the dispatch endpoint's policy.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PollRequest {
    pub product_key: Option<String>,
    pub credential: Option<String>,
    /// Kept as the raw string; integer parsing (and the empty reply on
    /// failure) happens at dispatch.
    pub food_eaten: Option<String>,
    pub drop_result: Option<String>,
}

impl PollRequest {
    pub fn parse(payload: &[u8]) -> Result<Self, WireError> {
        if !payload.is_ascii() {
            return Err(WireError::NotAscii);
        }
        let text = str::from_utf8(payload).map_err(|_| WireError::NotAscii)?;
        let mut req = PollRequest::default();
        for pair in text.split('&') {
            let Some((key, value)) = pair.split_once('=') else {
                return Err(WireError::MalformedPair(pair.to_string()));
            };
            match key {
                "u" => req.product_key = Some(value.to_string()),
                "p" => req.credential = Some(value.to_string()),
                "f" => req.food_eaten = Some(value.to_string()),
                "d" => req.drop_result = Some(value.to_string()),
                // unknown keys are ignored for forward compatibility
                _ => {}
            }
        }
        Ok(req)
    }
}

/// Every reply the dispatch endpoint can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollReply {
    /// Invalid payload, missing or bad credentials. Deliberately a bare
    /// empty body so the device cannot tell which check failed.
    Rejected,
    /// A `d` report was ingested; the queue was not consulted.
    StatusUpdated,
    /// Go drop food now.
    Drop,
    /// Nothing to do.
    Nothing,
}

impl PollReply {
    pub fn as_str(self) -> &'static str {
        match self {
            PollReply::Rejected => "",
            PollReply::StatusUpdated => "status updated",
            PollReply::Drop => "d",
            PollReply::Nothing => "n",
        }
    }

    pub fn as_bytes(self) -> &'static [u8] {
        self.as_str().as_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_consumption_poll() {
        let req = PollRequest::parse(b"u=testingkey1234&p=13511NG%%&f=50").unwrap();
        assert_eq!(req.product_key.as_deref(), Some("testingkey1234"));
        assert_eq!(req.credential.as_deref(), Some("13511NG%%"));
        assert_eq!(req.food_eaten.as_deref(), Some("50"));
        assert_eq!(req.drop_result, None);
    }

    #[test]
    fn parses_drop_report() {
        let req = PollRequest::parse(b"u=testingkey1234&p=13511NG%%&d=0").unwrap();
        assert_eq!(req.drop_result.as_deref(), Some("0"));
        assert_eq!(req.food_eaten, None);
    }

    #[test]
    fn value_keeps_everything_after_first_equals() {
        let req = PollRequest::parse(b"u=abc&p=a=b=c").unwrap();
        assert_eq!(req.credential.as_deref(), Some("a=b=c"));
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let req = PollRequest::parse(b"u=abc&p=pw&x=1").unwrap();
        assert_eq!(req.product_key.as_deref(), Some("abc"));
    }

    #[test]
    fn rejects_pair_without_equals() {
        assert_eq!(
            PollRequest::parse(b"feedme"),
            Err(WireError::MalformedPair("feedme".into()))
        );
        assert_eq!(
            PollRequest::parse(b""),
            Err(WireError::MalformedPair(String::new()))
        );
        assert!(PollRequest::parse(b"u=abc&junk").is_err());
    }

    #[test]
    fn rejects_non_ascii() {
        assert_eq!(
            PollRequest::parse("u=abc&p=caf\u{e9}".as_bytes()),
            Err(WireError::NotAscii)
        );
    }

    #[test]
    fn reply_bytes_are_exact() {
        assert_eq!(PollReply::Rejected.as_bytes(), b"");
        assert_eq!(PollReply::StatusUpdated.as_bytes(), b"status updated");
        assert_eq!(PollReply::Drop.as_bytes(), b"d");
        assert_eq!(PollReply::Nothing.as_bytes(), b"n");
    }
}

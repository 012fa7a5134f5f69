pub mod error;
pub mod inbound;
pub mod methods;
pub mod outbound;

pub use error::ErrorCode;
pub use inbound::InboundMessage;
pub use outbound::{ActiveAiRequest, OutboundEvent, RoomUser, Usage};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_round_trips() {
        let json = r#"{"type":"ping"}"#;
        let msg: InboundMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, InboundMessage::Ping));
    }

    #[test]
    fn continue_keyword_renames_cleanly() {
        let json = r#"{"type":"continue","conversation_id":"c1","message_id":"m1"}"#;
        let msg: InboundMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, InboundMessage::Continue { .. }));
    }

    #[test]
    fn unknown_type_fails_to_parse() {
        let json = r#"{"type":"not_a_real_type"}"#;
        let result: Result<InboundMessage, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn error_code_serializes_snake_case() {
        assert_eq!(ErrorCode::InsufficientCredits.as_str(), "insufficient_credits");
        let json = serde_json::to_string(&ErrorCode::NoApiKey).unwrap();
        assert_eq!(json, "\"no_api_key\"");
    }
}

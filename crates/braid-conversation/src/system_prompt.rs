use braid_core::types::{ConversationFormat, ConversationMode};

/// What the configured model can do, as far as prompt composition cares.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelCapabilities {
    pub supports_prefill: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct CliModeConfig {
    pub enabled: bool,
    pub message_threshold: u32,
}

impl From<&braid_core::config::GenerationConfig> for CliModeConfig {
    fn from(cfg: &braid_core::config::GenerationConfig) -> Self {
        Self {
            enabled: cfg.cli_mode_enabled,
            message_threshold: cfg.cli_mode_threshold,
        }
    }
}

const IDENTITY_PREFIX_TEMPLATE: &str = "You are {name}. You are connected to a multi-participant chat system. Please respond in character.";

const CLI_SIMULATION_PREFIX: &str = "You are operating in a simulated command-line environment. Respond as the CLI would, without conversational framing.";

/// Composes the system prompt delivered with a model call (spec §4.5).
/// A pure function of its inputs — calling it twice with the same
/// arguments yields the same string.
pub fn compose(
    participant_name: &str,
    participant_system_prompt: Option<&str>,
    format: ConversationFormat,
    message_count: u32,
    capabilities: ModelCapabilities,
    conversation_mode: Option<ConversationMode>,
    cli_mode: CliModeConfig,
) -> String {
    let is_prefill = matches!(format, ConversationFormat::Prefill);
    let mode_is_auto_or_unset = matches!(
        conversation_mode,
        None | Some(ConversationMode::Auto) | Some(ConversationMode::Prefill)
    );

    let cli_simulation_applies = is_prefill
        && message_count < cli_mode.message_threshold
        && cli_mode.enabled
        && capabilities.supports_prefill
        && mode_is_auto_or_unset;

    let effective_mode_is_messages = matches!(
        conversation_mode,
        Some(ConversationMode::Messages) | Some(ConversationMode::Completion)
    ) || (matches!(conversation_mode, None | Some(ConversationMode::Auto))
        && !capabilities.supports_prefill);

    let has_custom_prompt = participant_system_prompt
        .map(|p| !p.is_empty())
        .unwrap_or(false);

    let identity_applies = is_prefill && !has_custom_prompt && effective_mode_is_messages;

    let mut prompt = participant_system_prompt.unwrap_or("").to_string();

    if identity_applies {
        let prefix = IDENTITY_PREFIX_TEMPLATE.replace("{name}", participant_name);
        prompt = join_prefix(&prefix, &prompt);
    }

    if cli_simulation_applies {
        prompt = join_prefix(CLI_SIMULATION_PREFIX, &prompt);
    }

    prompt
}

fn join_prefix(prefix: &str, existing: &str) -> String {
    if existing.is_empty() {
        prefix.to_string()
    } else {
        format!("{prefix}\n\n{existing}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_prefix_applies_to_prefill_without_custom_prompt_in_messages_mode() {
        let result = compose(
            "Assistant",
            None,
            ConversationFormat::Prefill,
            5,
            ModelCapabilities { supports_prefill: false },
            None,
            CliModeConfig { enabled: true, message_threshold: 10 },
        );
        assert!(result.contains("You are Assistant."));
    }

    #[test]
    fn cli_simulation_prefix_applies_under_threshold() {
        let result = compose(
            "Assistant",
            Some("custom prompt"),
            ConversationFormat::Prefill,
            2,
            ModelCapabilities { supports_prefill: true },
            Some(ConversationMode::Auto),
            CliModeConfig { enabled: true, message_threshold: 10 },
        );
        assert!(result.contains("simulated command-line"));
        assert!(result.ends_with("custom prompt"));
    }

    #[test]
    fn standard_format_never_applies_either_prefix() {
        let result = compose(
            "Assistant",
            None,
            ConversationFormat::Standard,
            0,
            ModelCapabilities { supports_prefill: true },
            None,
            CliModeConfig { enabled: true, message_threshold: 10 },
        );
        assert_eq!(result, "");
    }

    #[test]
    fn is_idempotent() {
        let cfg = CliModeConfig { enabled: true, message_threshold: 10 };
        let once = compose(
            "Assistant",
            Some("hi"),
            ConversationFormat::Prefill,
            3,
            ModelCapabilities { supports_prefill: true },
            Some(ConversationMode::Auto),
            cfg,
        );
        let twice = compose(
            "Assistant",
            Some("hi"),
            ConversationFormat::Prefill,
            3,
            ModelCapabilities { supports_prefill: true },
            Some(ConversationMode::Auto),
            cfg,
        );
        assert_eq!(once, twice);
    }
}

use crate::mention::parse_directives;
use crate::mode::{AgentCall, CollaborationMode};
use crate::registry::ModeFactory;
use parley_core::{ParleyResult, HUMAN_SENTINEL, USER_CALLER};
use std::sync::Arc;

/// The unconstrained policy: agents call each other freely through `@`
/// mentions, with no step structure.
#[derive(Debug)]
pub struct FreeDiscussionMode;

impl FreeDiscussionMode {
    pub fn factory() -> ModeFactory {
        Arc::new(|_config| Ok(Arc::new(FreeDiscussionMode) as Arc<dyn CollaborationMode>))
    }
}

impl CollaborationMode for FreeDiscussionMode {
    fn name(&self) -> &str {
        "free_discussion"
    }

    fn description(&self) -> &str {
        "自由讨论模式 - 猫猫可以随意互相调用，适合开放式协作"
    }

    fn validate(&self) -> ParleyResult<()> {
        Ok(())
    }

    fn initialize(&self, _session_id: &str) -> ParleyResult<()> {
        Ok(())
    }

    fn on_user_message(
        &self,
        session_id: &str,
        content: &str,
        mentioned_agents: &[String],
    ) -> ParleyResult<Vec<AgentCall>> {
        Ok(mentioned_agents
            .iter()
            .map(|name| {
                AgentCall::new(name, content, session_id, USER_CALLER)
                    .with_metadata("source", serde_json::json!("user_message"))
            })
            .collect())
    }

    fn on_agent_response(
        &self,
        session_id: &str,
        agent_name: &str,
        response: &str,
    ) -> ParleyResult<Vec<AgentCall>> {
        Ok(parse_directives(response)
            .into_iter()
            .filter(|d| d.target != HUMAN_SENTINEL)
            .map(|d| {
                AgentCall::new(d.target, d.prompt, session_id, agent_name)
                    .with_metadata("source", serde_json::json!("agent_response"))
                    .with_metadata("caller_agent", serde_json::json!(agent_name))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_one_call_per_mention() {
        let mode = FreeDiscussionMode;
        let mentioned = vec!["花花".to_string(), "薇薇".to_string()];
        let calls = mode
            .on_user_message("sess_abc12345", "hi", &mentioned)
            .unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].agent_name, "花花");
        assert_eq!(calls[0].prompt, "hi");
        assert_eq!(calls[0].caller_name, "user");
        assert_eq!(calls[1].agent_name, "薇薇");
    }

    #[test]
    fn test_user_message_no_mentions_no_calls() {
        let mode = FreeDiscussionMode;
        let calls = mode.on_user_message("sess_abc12345", "hi", &[]).unwrap();
        assert!(calls.is_empty());
    }

    #[test]
    fn test_agent_response_parses_directives() {
        let mode = FreeDiscussionMode;
        let calls = mode
            .on_agent_response("sess_abc12345", "花花", "done\n@薇薇 please review")
            .unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].agent_name, "薇薇");
        assert_eq!(calls[0].prompt, "please review");
        assert_eq!(calls[0].caller_name, "花花");
    }

    #[test]
    fn test_human_sentinel_is_skipped() {
        let mode = FreeDiscussionMode;
        let calls = mode
            .on_agent_response("sess_abc12345", "花花", "@铲屎官 全部搞定了")
            .unwrap();
        assert!(calls.is_empty());
    }

    #[test]
    fn test_duplicate_directives_all_emitted() {
        let mode = FreeDiscussionMode;
        let calls = mode
            .on_agent_response("sess_abc12345", "花花", "@薇薇 first\n@薇薇 second")
            .unwrap();
        assert_eq!(calls.len(), 2);
    }
}

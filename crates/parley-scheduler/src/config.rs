use parley_core::{ParleyError, ParleyResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Static description of one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Logical agent name, e.g. `花花`.
    pub name: String,
    /// Queue name; jobs land on the stream `pipe:<pipe>`.
    pub pipe: String,
    /// Executable invoked by the worker.
    pub exec_cmd: String,
    /// Path of the agent's system-prompt text file.
    pub system_prompt_path: String,
    #[serde(default)]
    pub avatar: String,
}

/// Redis connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisSettings {
    pub addr: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub db: i64,
}

impl RedisSettings {
    /// Connection URL for the bus client.
    pub fn url(&self) -> String {
        if self.password.is_empty() {
            format!("redis://{}/{}", self.addr, self.db)
        } else {
            format!("redis://:{}@{}/{}", self.password, self.addr, self.db)
        }
    }
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:6379".to_string(),
            password: String::new(),
            db: 0,
        }
    }
}

/// User-facing presentation settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserSettings {
    #[serde(default)]
    pub avatar: String,
}

/// The YAML configuration file (conventionally `config.yaml`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParleyConfig {
    pub agents: Vec<AgentConfig>,
    #[serde(default)]
    pub redis: RedisSettings,
    #[serde(default)]
    pub user: UserSettings,
}

impl ParleyConfig {
    pub async fn load(path: impl AsRef<Path>) -> ParleyResult<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            ParleyError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        serde_yaml_ng::from_str(&raw)
            .map_err(|e| ParleyError::Config(format!("failed to parse {}: {}", path.display(), e)))
    }

    pub fn agent(&self, name: &str) -> Option<&AgentConfig> {
        self.agents.iter().find(|a| a.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
agents:
  - name: 花花
    pipe: pipe_huahua
    exec_cmd: ./agents/huahua.sh
    system_prompt_path: ./prompts/huahua.txt
    avatar: /images/huahua.png
  - name: 薇薇
    pipe: pipe_weiwei
    exec_cmd: ./agents/weiwei.sh
    system_prompt_path: ./prompts/weiwei.txt
redis:
  addr: 127.0.0.1:6379
  db: 2
user:
  avatar: /images/user.png
"#;

    #[test]
    fn test_parse_sample() {
        let config: ParleyConfig = serde_yaml_ng::from_str(SAMPLE).unwrap();
        assert_eq!(config.agents.len(), 2);
        assert_eq!(config.agents[0].name, "花花");
        assert_eq!(config.agents[0].pipe, "pipe_huahua");
        assert_eq!(config.agents[1].avatar, "");
        assert_eq!(config.redis.db, 2);
        assert_eq!(config.user.avatar, "/images/user.png");
        assert!(config.agent("薇薇").is_some());
        assert!(config.agent("小乔").is_none());
    }

    #[test]
    fn test_redis_url() {
        let plain = RedisSettings::default();
        assert_eq!(plain.url(), "redis://127.0.0.1:6379/0");

        let secured = RedisSettings {
            addr: "redis.internal:6380".into(),
            password: "hunter2".into(),
            db: 1,
        };
        assert_eq!(secured.url(), "redis://:hunter2@redis.internal:6380/1");
    }

    #[tokio::test]
    async fn test_load_missing_file_is_config_error() {
        let err = ParleyConfig::load("/nonexistent/config.yaml")
            .await
            .unwrap_err();
        assert!(matches!(err, ParleyError::Config(_)));
    }
}

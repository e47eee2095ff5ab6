use parley_core::{ParleyError, ParleyResult};
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Line prefix on stdout through which a CLI tool announces the resume token
/// of a freshly created conversation.
const SESSION_ID_PREFIX: &str = "SESSION_ID:";

/// Captured output of one child invocation.
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Builds the combined prompt handed to the CLI. The separator is part of
/// the invocation contract — agents key off it to find the user request.
pub fn build_prompt(system_prompt: &str, content: &str) -> String {
    format!("{}\n\n---\n\n用户需求：\n{}", system_prompt, content)
}

/// First `SESSION_ID:<token>` line on stdout, if any.
pub fn extract_resume_token(stdout: &str) -> Option<String> {
    stdout.lines().find_map(|line| {
        line.strip_prefix(SESSION_ID_PREFIX).and_then(|token| {
            let token = token.trim();
            (!token.is_empty()).then(|| token.to_string())
        })
    })
}

/// The agent's reply: stderr with `SESSION_ID:` lines stripped, trimmed.
pub fn extract_reply(stderr: &str) -> String {
    let kept: Vec<&str> = stderr
        .lines()
        .filter(|line| !line.starts_with(SESSION_ID_PREFIX))
        .collect();
    kept.join("\n").trim().to_string()
}

/// Runs `<exec_cmd> [--resume <token>] <prompt>` to completion, capturing
/// stdout and stderr separately. `CLAUDECODE` is stripped from the child's
/// environment so the tool does not mistake this for a nested session.
/// Returns `None` when cancelled mid-flight (the child is killed).
pub async fn run_agent_cli(
    exec_cmd: &str,
    resume_token: Option<&str>,
    prompt: &str,
    cancel: &CancellationToken,
) -> ParleyResult<Option<ExecOutput>> {
    let mut cmd = Command::new(exec_cmd);
    if let Some(token) = resume_token {
        cmd.arg("--resume").arg(token);
    }
    cmd.arg(prompt)
        .env_remove("CLAUDECODE")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(exec_cmd = %exec_cmd, resuming = resume_token.is_some(), "spawning agent CLI");

    let child = cmd
        .spawn()
        .map_err(|e| ParleyError::Exec(format!("failed to spawn {}: {}", exec_cmd, e)))?;

    let output = tokio::select! {
        output = child.wait_with_output() => {
            output.map_err(|e| ParleyError::Exec(format!("failed to wait on {}: {}", exec_cmd, e)))?
        }
        _ = cancel.cancelled() => return Ok(None),
    };

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        return Err(ParleyError::Exec(format!(
            "{} exited with {}: {}",
            exec_cmd,
            output.status.code().unwrap_or(-1),
            stderr.trim()
        )));
    }

    Ok(Some(ExecOutput { stdout, stderr }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_prompt_separator() {
        let prompt = build_prompt("你是花花。", "修一下登录页");
        assert_eq!(prompt, "你是花花。\n\n---\n\n用户需求：\n修一下登录页");
    }

    #[test]
    fn test_extract_resume_token() {
        assert_eq!(
            extract_resume_token("noise\nSESSION_ID:tok1\nmore"),
            Some("tok1".to_string())
        );
        assert_eq!(
            extract_resume_token("SESSION_ID: padded \nSESSION_ID:second"),
            Some("padded".to_string())
        );
        assert_eq!(extract_resume_token("SESSION_ID:"), None);
        assert_eq!(extract_resume_token("no token here"), None);
    }

    #[test]
    fn test_extract_reply_strips_session_lines() {
        let reply = extract_reply("  hello\nSESSION_ID:tok1\nworld  \n");
        assert_eq!(reply, "hello\nworld");
        assert_eq!(extract_reply("SESSION_ID:tok1\n"), "");
    }
}

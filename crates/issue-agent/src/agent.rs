use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::errors::{ProviderError, WorkError};
use crate::models::message::Message;
use crate::models::step::{FunctionContext, ReturnContext, Step};
use crate::providers::base::{ForwardInput, Forwarder};
use crate::tools::registry::ToolRegistry;

/// Text sent back to the model when a tool call failed
pub fn tool_error_message(err: &dyn std::fmt::Display) -> String {
    format!(
        "Error caused. error message: {}\nChange the arguments before using it again. If you still get an error, change the tool you are using",
        err
    )
}

/// Agent integrates a foundational LLM with the tools it may call.
///
/// One agent drives one conversation: it sends the prompts, runs every tool the model asks
/// for, and feeds the results back until the model answers without tools.
pub struct Agent {
    name: String,
    input: ForwardInput,
    max_steps: usize,
    forwarder: Arc<dyn Forwarder>,
    registry: ToolRegistry,
    cancel: CancellationToken,
    history: Vec<Message>,
}

impl Agent {
    pub fn new(
        name: impl Into<String>,
        input: ForwardInput,
        max_steps: usize,
        forwarder: Arc<dyn Forwarder>,
        registry: ToolRegistry,
    ) -> Self {
        Self {
            name: name.into(),
            input,
            max_steps,
            forwarder,
            registry,
            cancel: CancellationToken::new(),
            history: Vec::new(),
        }
    }

    /// Stop the work loop when this token fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.history.last()
    }

    /// Run the conversation to its end and return the model's final text.
    ///
    /// Reaching `max_steps` ends the loop without an error; the output is then whatever final
    /// text was produced, usually empty.
    pub async fn work(&mut self) -> Result<String, WorkError> {
        let span = info_span!("agent", name = %self.name);
        self.run().instrument(span).await
    }

    async fn run(&mut self) -> Result<String, WorkError> {
        info!(model = %self.input.model, tools = self.registry.len(), "agent started");
        debug!(system = %self.input.system_prompt, user = %self.input.user_prompt, "prompts");

        self.history = self
            .forwarder
            .start_forward(&self.input, &self.cancel)
            .await
            .map_err(forward_error)?;
        let mut step = self.forwarder.forward_step(&self.history, &self.registry);

        let mut output = String::new();
        let mut steps = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(WorkError::Cancelled);
            }
            steps += 1;
            if steps > self.max_steps {
                warn!(max_steps = self.max_steps, "step budget exhausted, stopping");
                break;
            }
            info!(step = step.name(), count = steps, "step");

            step = match step {
                Step::Exec(contexts) => Step::return_to_llm(self.exec(&contexts).await?),
                Step::ReturnToLlm(returns) => {
                    let history = std::mem::take(&mut self.history);
                    self.history = self
                        .forwarder
                        .forward_llm(&self.input, &returns, history, &self.cancel)
                        .await
                        .map_err(forward_error)?;
                    self.forwarder.forward_step(&self.history, &self.registry)
                }
                Step::WaitingInstruction(text) => {
                    output = text;
                    break;
                }
                Step::Unrecoverable(cause) => {
                    error!(%cause, "unrecoverable step");
                    return Err(WorkError::Unrecoverable(cause));
                }
                Step::Unknown => {
                    error!("unknown step");
                    return Err(WorkError::UnknownStep);
                }
            };
        }

        info!(steps, "agent finished");
        Ok(output)
    }

    /// Run every call of the turn in order; a failure becomes corrective text for the model
    async fn exec(&self, contexts: &[FunctionContext]) -> Result<Vec<ReturnContext>, WorkError> {
        let mut returns = Vec::with_capacity(contexts.len());
        for ctx in contexts {
            info!(tool = %ctx.tool_name, id = %ctx.caller_id, "calling tool");
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(WorkError::Cancelled),
                result = self.registry.dispatch(&ctx.tool_name, &ctx.arguments) => result,
            };

            let content = match result {
                Ok(content) => content,
                Err(err) => {
                    warn!(tool = %ctx.tool_name, error = %err, "tool call failed");
                    tool_error_message(&err)
                }
            };
            returns.push(ReturnContext {
                caller_id: ctx.caller_id.clone(),
                tool_name: ctx.tool_name.clone(),
                content,
            });
        }
        Ok(returns)
    }
}

/// Await `fut` unless `cancel` fires first
pub async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(WorkError::Cancelled.into()),
        result = fut => result,
    }
}

fn forward_error(err: ProviderError) -> WorkError {
    match err {
        ProviderError::Cancelled => WorkError::Cancelled,
        other => WorkError::Forward(other),
    }
}

/// Builds and runs one agent per request with a shared forwarder and step budget
#[derive(Clone)]
pub struct AgentInvoker {
    model: String,
    max_steps: usize,
    forwarder: Arc<dyn Forwarder>,
    cancel: CancellationToken,
}

impl AgentInvoker {
    pub fn new(model: impl Into<String>, max_steps: usize, forwarder: Arc<dyn Forwarder>) -> Self {
        Self {
            model: model.into(),
            max_steps,
            forwarder,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run a fresh agent and return its final text
    pub async fn invoke(
        &self,
        name: &str,
        system_prompt: &str,
        user_prompt: &str,
        registry: ToolRegistry,
    ) -> anyhow::Result<String> {
        for (field, value) in [
            ("name", name),
            ("system prompt", system_prompt),
            ("user prompt", user_prompt),
        ] {
            if value.trim().is_empty() {
                anyhow::bail!("agent {} is empty", field);
            }
        }

        let input = ForwardInput {
            model: self.model.clone(),
            system_prompt: system_prompt.to_string(),
            user_prompt: user_prompt.to_string(),
            tools: registry.tools(),
        };
        let mut agent = Agent::new(
            name,
            input,
            self.max_steps,
            Arc::clone(&self.forwarder),
            registry,
        )
        .with_cancellation(self.cancel.clone());

        let output = agent.work().await?;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{AgentError, AgentResult};
    use crate::models::message::{FinishReason, Role, ToolCall};
    use crate::models::tool::Tool;
    use crate::providers::mock::MockForwarder;
    use crate::tools::registry::ToolHandler;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ToolHandler for Echo {
        async fn call(&self, arguments: &str) -> AgentResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if arguments.contains("fail") {
                return Err(AgentError::ExecutionError("boom".into()));
            }
            Ok(format!("echo {}", arguments))
        }
    }

    fn registry() -> (ToolRegistry, Arc<Echo>) {
        let echo = Arc::new(Echo {
            calls: AtomicUsize::new(0),
        });
        let mut registry = ToolRegistry::new();
        registry
            .register(
                Tool::object("echo", "Echo the arguments", json!({}), &[]),
                echo.clone(),
            )
            .unwrap();
        (registry, echo)
    }

    fn input() -> ForwardInput {
        ForwardInput {
            model: "claude-3-5-sonnet-latest".into(),
            system_prompt: "You are a tester.".into(),
            user_prompt: "Run the echo tool".into(),
            tools: vec![],
        }
    }

    fn tool_turn(id: &str, arguments: &str) -> Message {
        Message::assistant()
            .with_tool_call(ToolCall::new(id, "echo", arguments))
            .with_finish_reason(FinishReason::ToolCalls)
    }

    fn stop(text: &str) -> Message {
        Message::assistant()
            .with_text(text)
            .with_finish_reason(FinishReason::Stop)
    }

    #[tokio::test]
    async fn test_tool_round_then_done() {
        let (registry, echo) = registry();
        let forwarder = Arc::new(MockForwarder::new(vec![
            tool_turn("c1", r#"{"x":1}"#),
            stop("Done"),
        ]));
        let mut agent = Agent::new("developer", input(), 3, forwarder.clone(), registry);

        let output = agent.work().await.unwrap();

        assert_eq!(output, "Done");
        assert_eq!(echo.calls.load(Ordering::SeqCst), 1);
        let history = agent.history();
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[2].role, Role::Tool);
        assert_eq!(history[2].text, r#"echo {"x":1}"#);
        assert_eq!(
            history[2].responding_tool_call.as_ref().unwrap().caller_id,
            "c1"
        );
        assert_eq!(agent.last_message().unwrap().text, "Done");
        assert_eq!(agent.name(), "developer");
    }

    #[tokio::test]
    async fn test_step_budget_stops_silently() {
        let (registry, echo) = registry();
        let forwarder = Arc::new(MockForwarder::new(vec![
            tool_turn("c1", "{}"),
            tool_turn("c2", "{}"),
            tool_turn("c3", "{}"),
        ]));
        let mut agent = Agent::new("developer", input(), 3, forwarder, registry);

        let output = agent.work().await.unwrap();

        assert_eq!(output, "");
        // exec, return, exec; the fourth step is over budget
        assert_eq!(echo.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_call_becomes_corrective_text() {
        let (registry, echo) = registry();
        let turn = Message::assistant()
            .with_tool_call(ToolCall::new("c1", "echo", r#"{"fail":true}"#))
            .with_tool_call(ToolCall::new("c2", "echo", r#"{"ok":true}"#))
            .with_finish_reason(FinishReason::ToolCalls);
        let forwarder = Arc::new(MockForwarder::new(vec![turn, stop("fixed")]));
        let mut agent = Agent::new("developer", input(), 10, forwarder, registry);

        assert_eq!(agent.work().await.unwrap(), "fixed");
        assert_eq!(echo.calls.load(Ordering::SeqCst), 2);

        let history = agent.history();
        assert_eq!(
            history[2].text,
            tool_error_message(&AgentError::ExecutionError("boom".into()))
        );
        assert!(history[2]
            .text
            .starts_with("Error caused. error message: Tool execution failed: boom\n"));
        assert_eq!(history[3].text, r#"echo {"ok":true}"#);
    }

    #[tokio::test]
    async fn test_unregistered_tool_is_unrecoverable() {
        let (registry, _) = registry();
        let turn = Message::assistant()
            .with_tool_call(ToolCall::new("c1", "rm_rf", "{}"))
            .with_finish_reason(FinishReason::ToolCalls);
        let forwarder = Arc::new(MockForwarder::new(vec![turn]));
        let mut agent = Agent::new("developer", input(), 10, forwarder, registry);

        match agent.work().await {
            Err(WorkError::Unrecoverable(cause)) => assert_eq!(cause, "function not found rm_rf"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_finish_reason_fails() {
        let (registry, _) = registry();
        let turn = Message::assistant()
            .with_finish_reason(FinishReason::Unknown("content_filter".into()));
        let forwarder = Arc::new(MockForwarder::new(vec![turn]));
        let mut agent = Agent::new("developer", input(), 10, forwarder, registry);

        assert!(matches!(agent.work().await, Err(WorkError::UnknownStep)));
    }

    #[tokio::test]
    async fn test_cancelled_agent_stops() {
        let (registry, echo) = registry();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let forwarder = Arc::new(MockForwarder::new(vec![tool_turn("c1", "{}")]));
        let mut agent =
            Agent::new("developer", input(), 10, forwarder, registry).with_cancellation(cancel);

        assert!(matches!(agent.work().await, Err(WorkError::Cancelled)));
        assert_eq!(echo.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invoker_validates_prompts() {
        let (registry, _) = registry();
        let forwarder = Arc::new(MockForwarder::new(vec![stop("plan")]));
        let invoker = AgentInvoker::new("claude-3-5-sonnet-latest", 5, forwarder.clone());

        let err = invoker
            .invoke("planner", "system", "  ", registry.clone())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "agent user prompt is empty");

        let output = invoker
            .invoke("planner", "system", "make a plan", registry)
            .await
            .unwrap();
        assert_eq!(output, "plan");
        assert_eq!(forwarder.requests()[0][0].text, "make a plan");
    }

    #[tokio::test]
    async fn test_cancellable_stops_pending_work() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = cancellable(&cancel, std::future::pending::<anyhow::Result<()>>())
            .await
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<WorkError>(), Some(WorkError::Cancelled)));

        let live = CancellationToken::new();
        assert_eq!(cancellable(&live, async { Ok(7) }).await.unwrap(), 7);
    }
}

//! The session pipeline — one conversation, one turn at a time.
//!
//! A [`Session`] owns the history, the exposure state, and the execution
//! coordinator for one conversation. [`Session::run_turn`] drives a user
//! utterance through exposure selection, prompt assembly, budget
//! partitioning, history trimming, the model call, and any tool-call chain
//! the model starts, until the model produces plain text.
//!
//! One turn is driven by exactly one caller: the session takes `&mut self`
//! for the whole turn, so there is nothing to lock.

use chrono::Utc;
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;
use voxloop_config::EngineConfig;
use voxloop_core::cancel::CancelToken;
use voxloop_core::error::{Error, ModelError};
use voxloop_core::event::{EngineEvent, EventBus};
use voxloop_core::history::HistoryEntry;
use voxloop_core::model::{LanguageModel, ModelReply, ModelRequest};
use voxloop_core::tool::{ToolCatalog, ToolSchema};

use crate::coordinator::ToolCoordinator;
use crate::exposure::{ExposureSelector, ExposureState};
use crate::history::HistoryLog;
use crate::token::{TokenBudget, estimate_schemas_tokens, estimate_tokens};
use crate::turn::{DEFAULT_USER, TurnContext};

/// Upper bound on tool-call links within one user turn. Exposure exclusion
/// stops a tool from answering itself, but a model can still ping-pong
/// between tools; this cuts that off.
const MAX_CHAIN_LINKS: usize = 8;

enum Step {
    /// The model answered with text; the turn is over.
    Reply(String),
    /// The model called a tool; continue with the chained context.
    Chained,
}

/// Caller-supplied knobs for one turn.
#[derive(Debug, Clone, Default)]
pub struct TurnOptions {
    /// Tools hidden from the model for this turn and its whole chain.
    pub exclude_tools: Vec<String>,
    /// Suppress the response event; the text is still returned and logged.
    pub skip_output: bool,
}

/// One conversation: history, exposure state, and the machinery to run
/// turns against a model and a tool catalog.
pub struct Session {
    id: String,
    user_id: String,
    config: EngineConfig,
    catalog: Arc<ToolCatalog>,
    model: Arc<dyn LanguageModel>,
    timezone: Tz,
    events: Arc<EventBus>,
    cancel: CancelToken,
    history: HistoryLog,
    exposure_state: ExposureState,
    selector: ExposureSelector,
    coordinator: ToolCoordinator,
}

impl Session {
    pub fn new(
        config: EngineConfig,
        catalog: Arc<ToolCatalog>,
        model: Arc<dyn LanguageModel>,
    ) -> Self {
        let events = Arc::new(EventBus::default());
        let selector = ExposureSelector::new(config.exposure.decay);
        let coordinator = ToolCoordinator::new(
            Duration::from_secs(config.timeouts.tool_timeout_secs),
            Arc::clone(&events),
        );
        let timezone = config.tz();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: DEFAULT_USER.to_string(),
            config,
            catalog,
            model,
            timezone,
            events,
            cancel: CancelToken::new(),
            history: HistoryLog::new(),
            exposure_state: ExposureState::new(),
            selector,
            coordinator,
        }
    }

    /// Attribute this session's turns to a specific user.
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.events)
    }

    /// A handle the caller can use to interrupt the turn in flight.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    /// Run one complete user turn, following any tool-call chain the model
    /// starts, and return the model's final text.
    ///
    /// A budget failure drops the turn and returns the error; a model
    /// transport failure becomes a visible error turn instead, so the
    /// conversation stays alive.
    pub async fn run_turn(&mut self, input_text: &str) -> Result<String, Error> {
        self.run_turn_with(input_text, TurnOptions::default()).await
    }

    /// Run one turn with explicit [`TurnOptions`] — a per-turn tool
    /// denylist and output suppression.
    pub async fn run_turn_with(
        &mut self,
        input_text: &str,
        options: TurnOptions,
    ) -> Result<String, Error> {
        self.cancel.reset();
        let mut turn = TurnContext::new(self.user_id.clone(), input_text);
        turn.excluded_tools
            .extend(options.exclude_tools.iter().cloned());
        turn.skip_output = options.skip_output;
        info!(session = %self.id, turn = %turn.id, "turn started");

        for _ in 0..MAX_CHAIN_LINKS {
            match self.run_link(&mut turn).await? {
                Step::Reply(text) => return Ok(text),
                Step::Chained => {
                    turn = turn.take_chained().ok_or_else(|| {
                        // The coordinator always chains before reporting.
                        Error::Internal("chained step left no chained turn".to_string())
                    })?;
                }
            }
        }

        warn!(session = %self.id, "tool chain exceeded {MAX_CHAIN_LINKS} links");
        Err(Error::Internal(
            "tool chain exceeded maximum depth".to_string(),
        ))
    }

    /// Run one link of the chain: one model call, plus tool execution if
    /// the model asked for one.
    async fn run_link(&mut self, turn: &mut TurnContext) -> Result<Step, Error> {
        if self.cancel.is_cancelled() {
            return Err(ModelError::Interrupted("turn cancelled by caller".into()).into());
        }

        // Exposure: which tools does the model get to see this link.
        let input = turn.input_text.clone().unwrap_or_default();
        let exposures = self.selector.select(
            &input,
            &self.catalog,
            &mut self.exposure_state,
            self.config.exposure.force_all,
            &turn.excluded_tools,
        );
        for exposure in &exposures {
            self.events.publish(EngineEvent::ToolExposed {
                tool_name: exposure.descriptor.name.clone(),
                reason: exposure.reason.to_string(),
                timestamp: Utc::now(),
            });
            // Additions precede finalize, so these cannot be rejected.
            if !exposure.descriptor.init_prompt.is_empty() {
                let _ = turn.add_prompt_addition(&exposure.descriptor.init_prompt);
            }
        }
        turn.exposed_tools = exposures
            .iter()
            .map(|e| Arc::clone(&e.descriptor))
            .collect();

        if !turn.local_time_added {
            let stamp = Utc::now()
                .with_timezone(&self.timezone)
                .format("%A, %Y-%m-%d %H:%M");
            let _ = turn.add_prompt_addition(format!("The current local time is {stamp}."));
            turn.local_time_added = true;
        }

        let system_prompt = turn.prompt_additions.finalize(&self.config.base_prompt);

        // Budget: partition the window, then trim history to fit.
        let schemas: Vec<ToolSchema> =
            turn.exposed_tools.iter().map(|d| d.schema()).collect();
        let input_tokens = match &turn.tool_result {
            Some(attachment) => estimate_tokens(&attachment.content),
            None => estimate_tokens(&input),
        };
        let completion_reserve = turn
            .exposed_tools
            .iter()
            .map(|d| d.tokens_for_answer)
            .fold(self.config.budget.completion_reserve, usize::max);
        let tool_result_reserve = turn
            .exposed_tools
            .iter()
            .map(|d| d.tokens_for_result)
            .max()
            .unwrap_or(0);

        let budget = match TokenBudget::partition(
            self.config.context_window(&self.config.model),
            input_tokens,
            estimate_schemas_tokens(&schemas),
            completion_reserve,
            tool_result_reserve,
            self.config.budget.per_message_cap,
            self.config.budget.per_function_cap,
        ) {
            Ok(budget) => budget,
            Err(err) => {
                warn!(session = %self.id, %err, "turn dropped");
                self.events.publish(EngineEvent::TurnDropped {
                    session_id: self.id.clone(),
                    reason: err.to_string(),
                    timestamp: Utc::now(),
                });
                return Err(err.into());
            }
        };
        self.history.trim(&system_prompt, &budget);

        // Append this link's pending input after trimming, so the budget's
        // input share is what protects it.
        if let Some(attachment) = &turn.tool_result {
            self.history.push(HistoryEntry::tool_result(
                &attachment.call_id,
                &attachment.tool_name,
                &attachment.content,
            ));
        } else if !turn.skip_input_capture && !input.is_empty() {
            self.history.push(HistoryEntry::user(&input));
        }

        let request = ModelRequest {
            model: self.config.model.clone(),
            system_prompt,
            history: self.history.window().to_vec(),
            tools: schemas,
        };

        debug!(
            session = %self.id,
            tools = request.tools.len(),
            history = request.history.len(),
            "calling model"
        );
        let model_timeout = Duration::from_secs(self.config.timeouts.model_timeout_secs);
        let reply = match tokio::time::timeout(model_timeout, self.model.generate(request)).await
        {
            Err(_) => Err(ModelError::Timeout {
                timeout_secs: model_timeout.as_secs(),
            }),
            Ok(result) => result,
        };

        // A reply that raced a cancellation is discarded, not half-applied.
        if self.cancel.is_cancelled() {
            return Err(ModelError::Interrupted("turn cancelled by caller".into()).into());
        }

        match reply {
            Ok(ModelReply::Text(text)) => {
                self.history.push(HistoryEntry::assistant(&text));
                turn.output_text = Some(text.clone());
                if !turn.skip_output {
                    self.events.publish(EngineEvent::ResponseGenerated {
                        session_id: self.id.clone(),
                        model: self.config.model.clone(),
                        output_text: text.clone(),
                        timestamp: Utc::now(),
                    });
                }
                Ok(Step::Reply(text))
            }
            Ok(ModelReply::ToolCall(call)) => {
                self.history.push(HistoryEntry::tool_call(
                    &call.id,
                    &call.name,
                    &call.arguments,
                ));
                let tool_name = call.name.clone();
                turn.pending_tool_call = Some(call);
                self.coordinator.execute(&self.catalog, turn).await?;
                // Let the model follow up on its own result, without
                // shortening a keyword-match window still in flight.
                self.exposure_state
                    .extend(&tool_name, self.config.exposure.post_execution_grants);
                Ok(Step::Chained)
            }
            Err(err @ ModelError::Interrupted(_)) => Err(err.into()),
            Err(err) => {
                // Transport and provider failures become a visible error
                // turn; the session keeps going.
                warn!(session = %self.id, %err, "model call failed");
                self.events.publish(EngineEvent::ErrorOccurred {
                    context: "model".to_string(),
                    error_message: err.to_string(),
                    timestamp: Utc::now(),
                });
                let apology = format!("I could not produce a response: {err}.");
                self.history.push(HistoryEntry::assistant(&apology));
                Ok(Step::Reply(apology))
            }
        }
    }
}

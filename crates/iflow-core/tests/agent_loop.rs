use anyhow::Result;
use async_trait::async_trait;
use iflow_core::extensions::ExampleExtension;
use iflow_core::ui_writer::UiWriter;
use iflow_core::{
    Agent, CommandOutcome, Confirmer, ConversationStore, ExecutionResult, Extension,
    ExtensionSet, SessionConfig, SlashCommand, ToolHandler, TurnOutcome,
};
use iflow_providers::{
    CompletionChunk, CompletionRequest, CompletionResponse, CompletionStream, Endpoint,
    LLMProvider, Message, MessageRole, ProviderError,
};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

enum Reply {
    Chunks(Vec<&'static str>),
    Fail(u16, &'static str),
    /// Send the chunks, then stall until cancelled.
    Hang(Vec<&'static str>),
    /// Send the chunks, then break the stream.
    FailAfter(Vec<&'static str>, &'static str),
}

struct ScriptedProvider {
    replies: Mutex<VecDeque<Reply>>,
    requests: Arc<Mutex<Vec<Vec<Message>>>>,
    titles: Arc<Mutex<usize>>,
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    async fn complete(
        &self,
        _endpoint: &Endpoint,
        request: CompletionRequest,
    ) -> Result<CompletionResponse> {
        assert!(!request.stream);
        *self.titles.lock().unwrap() += 1;
        Ok(CompletionResponse {
            content: "\"Greeting chat.\"".to_string(),
            model: request.model,
        })
    }

    async fn stream(
        &self,
        _endpoint: &Endpoint,
        request: CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<CompletionStream> {
        self.requests.lock().unwrap().push(request.messages.clone());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Reply::Chunks(vec!["out of script"]));

        let (tx, rx) = mpsc::channel(16);
        match reply {
            Reply::Fail(status, body) => {
                return Err(ProviderError::Http {
                    status,
                    body: body.to_string(),
                }
                .into())
            }
            Reply::Chunks(chunks) => {
                tokio::spawn(async move {
                    for chunk in chunks {
                        if tx.send(Ok(CompletionChunk::delta(chunk))).await.is_err() {
                            return;
                        }
                    }
                    let _ = tx.send(Ok(CompletionChunk::done())).await;
                });
            }
            Reply::Hang(chunks) => {
                tokio::spawn(async move {
                    for chunk in chunks {
                        let _ = tx.send(Ok(CompletionChunk::delta(chunk))).await;
                    }
                    cancel.cancelled().await;
                    drop(tx);
                });
            }
            Reply::FailAfter(chunks, message) => {
                tokio::spawn(async move {
                    for chunk in chunks {
                        let _ = tx.send(Ok(CompletionChunk::delta(chunk))).await;
                    }
                    let _ = tx
                        .send(Err(ProviderError::Stream(message.to_string()).into()))
                        .await;
                });
            }
        }
        Ok(ReceiverStream::new(rx))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Answers from a queue, `false` once it runs dry, and remembers every question.
struct ScriptedConfirmer {
    answers: Mutex<VecDeque<bool>>,
    questions: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Confirmer for ScriptedConfirmer {
    async fn confirm(&self, title: &str, message: &str) -> bool {
        self.questions
            .lock()
            .unwrap()
            .push(format!("{}: {}", title, message));
        self.answers.lock().unwrap().pop_front().unwrap_or(false)
    }
}

#[derive(Clone, Default)]
struct RecordingWriter {
    events: Arc<Mutex<Vec<String>>>,
}

impl RecordingWriter {
    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl UiWriter for RecordingWriter {
    fn print_assistant_start(&self) {}
    fn print_delta(&self, text: &str) {
        self.push(format!("delta:{}", text));
    }
    fn print_assistant_end(&self) {}
    fn print_directive(&self, directive: &str, auto_approved: bool) {
        self.push(format!("directive:{}:{}", directive, auto_approved));
    }
    fn print_tool_result(&self, tool: &str, result: &ExecutionResult, show_output: bool) {
        self.push(format!("tool:{}:{}:{}", tool, result.success, show_output));
    }
    fn print_status(&self, message: &str) {
        self.push(format!("status:{}", message));
    }
    fn print_warning(&self, message: &str) {
        self.push(format!("warning:{}", message));
    }
    fn print_error(&self, message: &str) {
        self.push(format!("error:{}", message));
    }
    fn print_debug(&self, _message: &str) {}
    fn flush(&self) {}
}

/// Stands in for the shell so tests never spawn processes.
struct RecordingTool {
    reply: &'static str,
    calls: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ToolHandler for RecordingTool {
    async fn execute(
        &self,
        args: &str,
        _confirmer: &dyn Confirmer,
    ) -> anyhow::Result<ExecutionResult> {
        self.calls.lock().unwrap().push(args.to_string());
        Ok(ExecutionResult::ok(format!("{} {}", self.reply, args)))
    }
}

struct StubExtension {
    name: &'static str,
    tool: &'static str,
    reply: &'static str,
    calls: Arc<Mutex<Vec<String>>>,
}

impl Extension for StubExtension {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "test stub"
    }

    fn tools(&self) -> BTreeMap<String, Arc<dyn ToolHandler>> {
        let mut tools: BTreeMap<String, Arc<dyn ToolHandler>> = BTreeMap::new();
        tools.insert(
            self.tool.to_string(),
            Arc::new(RecordingTool {
                reply: self.reply,
                calls: self.calls.clone(),
            }),
        );
        tools
    }
}

struct Harness {
    agent: Agent<RecordingWriter>,
    requests: Arc<Mutex<Vec<Vec<Message>>>>,
    questions: Arc<Mutex<Vec<String>>>,
    shell_calls: Arc<Mutex<Vec<String>>>,
    titles: Arc<Mutex<usize>>,
    events: Arc<Mutex<Vec<String>>>,
}

fn harness_with(replies: Vec<Reply>, answers: Vec<bool>, mut extensions: ExtensionSet) -> Harness {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let questions = Arc::new(Mutex::new(Vec::new()));
    let shell_calls = Arc::new(Mutex::new(Vec::new()));
    let titles = Arc::new(Mutex::new(0));

    let provider = ScriptedProvider {
        replies: Mutex::new(replies.into()),
        requests: requests.clone(),
        titles: titles.clone(),
    };
    let confirmer = ScriptedConfirmer {
        answers: Mutex::new(answers.into()),
        questions: questions.clone(),
    };
    extensions.add(Arc::new(StubExtension {
        name: "fake-shell",
        tool: "cmd",
        reply: "ran",
        calls: shell_calls.clone(),
    }));

    let writer = RecordingWriter::default();
    let events = writer.events.clone();
    let agent = Agent::new(
        Box::new(provider),
        SessionConfig::default(),
        extensions,
        Arc::new(confirmer),
        writer,
    );

    Harness {
        agent,
        requests,
        questions,
        shell_calls,
        titles,
        events,
    }
}

fn harness(replies: Vec<Reply>, answers: Vec<bool>) -> Harness {
    harness_with(replies, answers, ExtensionSet::new())
}

fn result_messages(messages: &[Message]) -> Vec<&str> {
    messages
        .iter()
        .filter(|m| m.role == MessageRole::User && m.content.starts_with("Directive result:"))
        .map(|m| m.content.as_str())
        .collect()
}

#[tokio::test]
async fn test_plain_reply_completes_turn() {
    let mut h = harness(vec![Reply::Chunks(vec!["Hello", " there."])], vec![]);

    let result = h.agent.send("hi").await.unwrap();

    assert_eq!(result.outcome, TurnOutcome::Completed);
    assert_eq!(result.response, "Hello there.");
    assert_eq!(result.directives_executed, 0);
    let messages = h.agent.conversation().messages();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[1], Message::user("hi"));
    assert_eq!(messages[2], Message::assistant("Hello there."));
    assert!(h.questions.lock().unwrap().is_empty());

    assert_eq!(
        *h.events.lock().unwrap(),
        vec!["delta:Hello", "delta: there."]
    );
}

#[tokio::test]
async fn test_last_directive_wins() {
    let mut h = harness(
        vec![
            Reply::Chunks(vec!["ok @cmd(dir) more ", "text @cmd(ls)"]),
            Reply::Chunks(vec!["Two files."]),
        ],
        vec![true],
    );

    let result = h.agent.send("list files").await.unwrap();

    assert_eq!(result.outcome, TurnOutcome::Completed);
    assert_eq!(result.response, "Two files.");
    assert_eq!(result.directives_executed, 1);
    assert_eq!(*h.shell_calls.lock().unwrap(), vec!["ls"]);

    let messages = h.agent.conversation().messages();
    assert_eq!(messages.len(), 5);
    assert_eq!(
        messages[3].content,
        "Directive result:\n[tool cmd output]:\nran ls\n\nPlease continue your reply based on this result."
    );

    // The follow-up request carries the result as its last message.
    let requests = h.requests.lock().unwrap();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].last(), Some(&messages[3]));
}

#[tokio::test]
async fn test_declined_command_is_reported_and_not_run() {
    let mut h = harness(
        vec![
            Reply::Chunks(vec!["done @/clear"]),
            Reply::Chunks(vec!["Understood."]),
        ],
        vec![false],
    );

    let result = h.agent.send("tidy up").await.unwrap();

    assert_eq!(result.outcome, TurnOutcome::Completed);
    let messages = h.agent.conversation().messages();
    // Nothing was cleared.
    assert_eq!(messages[1], Message::user("tidy up"));
    let results = result_messages(messages);
    assert_eq!(results.len(), 1);
    assert!(results[0].contains("[system] user declined command /clear"));
    assert_eq!(h.questions.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_confirmed_command_runs() {
    let mut h = harness(
        vec![
            Reply::Chunks(vec!["Switching. @/model qwen3-max"]),
            Reply::Chunks(vec!["Done."]),
        ],
        vec![true],
    );

    h.agent.send("use qwen3-max").await.unwrap();

    assert_eq!(h.agent.session().model(), "qwen3-max");
    let messages = h.agent.conversation().messages();
    assert!(result_messages(messages)[0].contains("[system] command /model: model set to qwen3-max"));
}

#[tokio::test]
async fn test_elevation_skips_later_prompts() {
    let mut h = harness(
        vec![
            Reply::Chunks(vec!["I need control. @request_control()"]),
            Reply::Chunks(vec!["Checking. @cmd(pwd)"]),
            Reply::Chunks(vec!["You are in /tmp."]),
        ],
        vec![true],
    );

    let result = h.agent.send("where am I").await.unwrap();

    assert_eq!(result.outcome, TurnOutcome::Completed);
    assert_eq!(result.directives_executed, 2);
    assert!(h.agent.conversation().permission().is_elevated());
    assert_eq!(h.questions.lock().unwrap().len(), 1);
    assert_eq!(*h.shell_calls.lock().unwrap(), vec!["pwd"]);

    let events = h.events.lock().unwrap();
    assert!(events.contains(&"directive:@request_control():false".to_string()));
    assert!(events.contains(&"directive:@cmd(pwd):true".to_string()));
}

#[tokio::test]
async fn test_exit_always_asks() {
    let mut h = harness(
        vec![
            Reply::Chunks(vec!["@request_control()"]),
            Reply::Chunks(vec!["Goodbye. @/exit"]),
        ],
        vec![true, true],
    );

    let result = h.agent.send("we are done").await.unwrap();

    assert!(result.is_exit());
    assert_eq!(result.response, "Goodbye. @/exit");
    assert_eq!(h.questions.lock().unwrap().len(), 2);
    assert_eq!(h.requests.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_declined_exit_continues() {
    let mut h = harness(
        vec![
            Reply::Chunks(vec!["Goodbye. @/exit"]),
            Reply::Chunks(vec!["Staying then."]),
        ],
        vec![false],
    );

    let result = h.agent.send("bye").await.unwrap();

    assert_eq!(result.outcome, TurnOutcome::Completed);
    assert_eq!(result.response, "Staying then.");
    let messages = h.agent.conversation().messages();
    assert!(result_messages(messages)[0].contains("[system] user declined command /exit"));
}

#[tokio::test]
async fn test_unknown_tool_fails_without_prompt() {
    let mut h = harness(
        vec![
            Reply::Chunks(vec!["Let me try @frobnicate(x)"]),
            Reply::Chunks(vec!["That tool does not exist."]),
        ],
        vec![],
    );

    let result = h.agent.send("frobnicate").await.unwrap();

    assert_eq!(result.outcome, TurnOutcome::Completed);
    assert!(h.questions.lock().unwrap().is_empty());
    let messages = h.agent.conversation().messages();
    assert!(result_messages(messages)[0]
        .contains("[tool frobnicate] failed: unknown tool: frobnicate"));
}

#[tokio::test]
async fn test_invalid_command_fails_without_prompt() {
    let mut h = harness(
        vec![
            Reply::Chunks(vec!["@/teleport home"]),
            Reply::Chunks(vec!["Sorry."]),
        ],
        vec![],
    );

    h.agent.send("go home").await.unwrap();

    assert!(h.questions.lock().unwrap().is_empty());
    let messages = h.agent.conversation().messages();
    assert!(result_messages(messages)[0].contains("[system] command /teleport failed: unknown command"));
}

#[tokio::test]
async fn test_later_extension_answers_duplicate_tool() {
    let extensions = ExtensionSet::new()
        .with(Arc::new(ExampleExtension))
        .with(Arc::new(StubExtension {
            name: "howdy",
            tool: "hello",
            reply: "Howdy,",
            calls: Arc::new(Mutex::new(Vec::new())),
        }));
    let mut h = harness_with(
        vec![
            Reply::Chunks(vec!["@hello(Ann)"]),
            Reply::Chunks(vec!["Greeted."]),
        ],
        vec![true],
        extensions,
    );

    h.agent.send("greet Ann").await.unwrap();

    assert_eq!(h.agent.tools().owner("hello"), Some("howdy"));
    let messages = h.agent.conversation().messages();
    assert!(result_messages(messages)[0].contains("[tool hello output]:\nHowdy, Ann"));
}

#[tokio::test]
async fn test_cancel_mid_stream_discards_partial_reply() {
    let mut h = harness(
        vec![
            Reply::Hang(vec!["Thinking about "]),
            Reply::Chunks(vec!["Fresh start."]),
        ],
        vec![],
    );
    let signal = h.agent.cancel_signal();
    let before = h.agent.conversation().len();

    let (result, _) = tokio::join!(h.agent.send("write an essay"), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        signal.request();
    });

    let result = result.unwrap();
    assert_eq!(result.outcome, TurnOutcome::Cancelled);
    assert_eq!(h.agent.conversation().len(), before + 1);
    assert!(!signal.is_requested());

    // The next turn is unaffected.
    let result = h.agent.send("never mind").await.unwrap();
    assert_eq!(result.outcome, TurnOutcome::Completed);
    assert_eq!(result.response, "Fresh start.");
}

#[tokio::test]
async fn test_stop_directive_ends_turn() {
    let mut h = harness(vec![Reply::Chunks(vec!["Stopping. @/stop"])], vec![true]);

    let result = h.agent.send("stop").await.unwrap();

    assert_eq!(result.outcome, TurnOutcome::Cancelled);
    assert_eq!(h.requests.lock().unwrap().len(), 1);
    assert!(!h.agent.cancel_signal().is_requested());
}

#[tokio::test]
async fn test_http_error_keeps_no_partial_reply() {
    let mut h = harness(vec![Reply::Fail(401, "invalid api key")], vec![]);

    let err = h.agent.send("hi").await.unwrap_err();

    match err.downcast_ref::<ProviderError>() {
        Some(ProviderError::Http { status, body }) => {
            assert_eq!(*status, 401);
            assert_eq!(body, "invalid api key");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    let messages = h.agent.conversation().messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].role, MessageRole::User);
}

#[tokio::test]
async fn test_stream_failure_discards_partial_reply() {
    let mut h = harness(
        vec![Reply::FailAfter(
            vec!["Half of ", "an answer @cmd(ls)"],
            "connection reset",
        )],
        vec![],
    );

    let err = h.agent.send("hi").await.unwrap_err();

    assert!(matches!(
        err.downcast_ref::<ProviderError>(),
        Some(ProviderError::Stream(_))
    ));
    let messages = h.agent.conversation().messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, MessageRole::System);
    assert_eq!(messages[1].role, MessageRole::User);
    assert_eq!(messages[1].content, "hi");

    let events = h.events.lock().unwrap();
    assert!(events.contains(&"delta:Half of ".to_string()));
    assert!(!events.iter().any(|e| e.starts_with("directive:")));
    assert!(h.shell_calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_reply_appends_nothing() {
    let mut h = harness(vec![Reply::Chunks(vec![])], vec![]);

    let result = h.agent.send("hello?").await.unwrap();

    assert_eq!(result.outcome, TurnOutcome::EmptyReply);
    assert_eq!(h.agent.conversation().len(), 2);
    assert!(h
        .events
        .lock()
        .unwrap()
        .iter()
        .any(|e| e.starts_with("warning:")));
}

#[tokio::test]
async fn test_empty_input_is_rejected() {
    let mut h = harness(vec![], vec![]);
    assert!(h.agent.send("   ").await.is_err());
    assert_eq!(h.agent.conversation().len(), 1);
}

#[tokio::test]
async fn test_export_clear_import_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chat.json");
    let path_arg = path.to_string_lossy().to_string();
    let mut h = harness(vec![Reply::Chunks(vec!["Hi!"])], vec![]);
    h.agent.send("hello").await.unwrap();
    let original = h.agent.conversation().messages().to_vec();

    let outcome = h
        .agent
        .run_command(SlashCommand::Export(path_arg.clone()))
        .await
        .unwrap();
    assert!(matches!(outcome, CommandOutcome::Done(_)));

    h.agent.run_command(SlashCommand::Clear).await.unwrap();
    assert_eq!(h.agent.conversation().len(), 1);

    h.agent
        .run_command(SlashCommand::Import(path_arg))
        .await
        .unwrap();
    assert_eq!(h.agent.conversation().messages(), &original[..]);

    assert!(h
        .agent
        .run_command(SlashCommand::Import(
            dir.path().join("missing.json").to_string_lossy().to_string()
        ))
        .await
        .is_err());
}

#[tokio::test]
async fn test_auto_save_names_conversation_once() {
    let dir = tempfile::tempdir().unwrap();
    let store = ConversationStore::new(dir.path());
    let mut h = harness(
        vec![
            Reply::Chunks(vec!["Hello!"]),
            Reply::Chunks(vec!["Still here."]),
        ],
        vec![],
    );
    h.agent = h.agent.with_store(store.clone());

    h.agent.send("hi").await.unwrap();
    h.agent.send("are you there").await.unwrap();

    assert_eq!(*h.titles.lock().unwrap(), 1);
    assert_eq!(h.agent.conversation().name(), Some("Greeting chat"));
    let saved = store.list().unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].name, "Greeting chat");
    assert_eq!(
        store.load("Greeting chat").unwrap(),
        h.agent.conversation().messages()
    );

    let listing = h.agent.run_command(SlashCommand::History).await.unwrap();
    match listing {
        CommandOutcome::Done(text) => assert!(text.contains("Greeting chat")),
        CommandOutcome::Exit => panic!("history should not exit"),
    }
}

#[tokio::test]
async fn test_load_replaces_conversation() {
    let dir = tempfile::tempdir().unwrap();
    let store = ConversationStore::new(dir.path());
    store
        .save(
            "old trip",
            &[Message::user("plan a trip"), Message::assistant("Where to?")],
        )
        .unwrap();
    let mut h = harness(vec![], vec![]);
    h.agent = h.agent.with_store(store);

    h.agent
        .run_command(SlashCommand::Load("old trip.json".to_string()))
        .await
        .unwrap();

    let conversation = h.agent.conversation();
    assert_eq!(conversation.name(), Some("old trip"));
    assert_eq!(conversation.messages()[0].role, MessageRole::System);
    assert_eq!(conversation.messages()[1], Message::user("plan a trip"));
    assert_eq!(conversation.len(), 3);
}

#[tokio::test]
async fn test_info_and_extension_commands() {
    let mut h = harness_with(vec![], vec![], ExtensionSet::new().with(Arc::new(ExampleExtension)));

    let CommandOutcome::Done(info) = h.agent.run_command(SlashCommand::Info).await.unwrap() else {
        panic!("info should not exit");
    };
    assert!(info.contains("control: locked"));
    assert!(info.contains("api key: not set (not set)"));
    assert!(info.contains("extensions: example, fake-shell"));
    assert!(info.contains("calculate"));

    let CommandOutcome::Done(list) = h
        .agent
        .run_command(SlashCommand::parse("/extension list").unwrap())
        .await
        .unwrap()
    else {
        panic!("list should not exit");
    };
    assert!(list.contains("example v1.0.0"));

    assert!(h
        .agent
        .run_command(SlashCommand::parse("/extension info nothing").unwrap())
        .await
        .is_err());

    let system = h.agent.conversation().system_prompt().unwrap();
    assert!(system.contains("@calculate(expression)"));
}

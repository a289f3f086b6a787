//! スクリプト化されたホストエンジン
//!
//! メモリ上の小さな実行エンジンでスイートを1つ実行し、その間のライフサイクルを
//! エージェントに通知します。リモートコントローラを起動してから
//! `scripted-host --port <port>` で接続させると、一時停止や変数の書き換えを試せます。

use anyhow::Result;
use clap::Parser;
use parking_lot::Mutex;
use relay_core::{
    Agent, AgentConfig, Attributes, Engine, ExecutionListener, FrameStack, Keyword,
    KeywordSource, Library, LibraryError, LibraryResolver, Value, VariableFrame,
};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "scripted-host")]
#[command(about = "Run a scripted suite with the debugging agent attached", long_about = None)]
struct Args {
    /// Host of the remote controller
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Port of the remote controller
    #[arg(short, long)]
    port: u16,

    /// Seconds to keep retrying the connection
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Pause when a keyword fails
    #[arg(long)]
    pause_on_failure: bool,
}

/// デモ用の実行エンジン
struct ScriptedEngine {
    stack: Mutex<FrameStack>,
    aborted: AtomicBool,
}

impl ScriptedEngine {
    fn new() -> Self {
        let globals = VariableFrame::new()
            .with("${OUTPUT_DIR}", Value::str("/tmp/relay-demo"))
            .with("${TRUE}", Value::Bool(true));
        Self {
            stack: Mutex::new(FrameStack::new(globals)),
            aborted: AtomicBool::new(false),
        }
    }

    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// `${name}` 形式の引数を最も内側のフレームの値で置き換える
    fn resolve_arg(&self, arg: &str) -> String {
        let stack = self.stack.lock();
        let innermost = &stack.frames()[stack.innermost_index()];
        match innermost.get(arg) {
            Some(value) => value.to_string(),
            None => arg.to_string(),
        }
    }
}

impl Engine for ScriptedEngine {
    fn name_and_version(&self) -> String {
        format!("Scripted Host {}", env!("CARGO_PKG_VERSION"))
    }

    fn with_variables(&self, f: &mut dyn FnMut(&mut FrameStack)) {
        f(&mut *self.stack.lock());
    }

    fn run_keyword_and_return_status(&self, name: &str, args: &[String]) -> Result<bool, String> {
        let args: Vec<String> = args.iter().map(|a| self.resolve_arg(a)).collect();
        match (name, args.as_slice()) {
            ("Should Be True", [condition]) => Ok(matches!(condition.as_str(), "True" | "true" | "1")),
            ("Should Be Equal", [first, second]) => Ok(first == second),
            ("Should Be True", _) | ("Should Be Equal", _) => {
                Err(format!("Keyword '{}' got {} arguments", name, args.len()))
            }
            _ => Err(format!("No keyword with name '{}' found.", name)),
        }
    }

    fn request_abort(&self) {
        warn!("execution abort requested");
        self.aborted.store(true, Ordering::SeqCst);
    }
}

struct DemoKeyword {
    name: &'static str,
    line: u32,
}

impl Keyword for DemoKeyword {
    fn name(&self) -> &str {
        self.name
    }

    fn source(&self) -> Option<KeywordSource> {
        Some(KeywordSource {
            file_path: "/opt/demo/DemoLibrary.py".to_string(),
            line: self.line,
            column_offset: 4,
            length: self.name.len() as u32,
        })
    }
}

struct DemoLibrary {
    keywords: Vec<Arc<dyn Keyword>>,
}

impl Library for DemoLibrary {
    fn name(&self) -> &str {
        "DemoLibrary"
    }

    fn keywords(&self) -> Vec<Arc<dyn Keyword>> {
        self.keywords.clone()
    }
}

/// `DemoLibrary` だけを解決できるリゾルバ
struct DemoResolver;

impl LibraryResolver for DemoResolver {
    fn import_library(&self, name: &str, _args: &[String]) -> Result<Arc<dyn Library>, LibraryError> {
        if name != "DemoLibrary" {
            return Err(LibraryError::Import {
                name: name.to_string(),
                message: "library not found".to_string(),
            });
        }
        Ok(Arc::new(DemoLibrary {
            keywords: vec![
                Arc::new(DemoKeyword { name: "Greet", line: 12 }),
                Arc::new(DemoKeyword { name: "Compare Greeting", line: 20 }),
            ],
        }))
    }

    fn library_stub(&self, name: &str, _args: &[String]) -> Result<Arc<dyn Library>, LibraryError> {
        Err(LibraryError::Stub {
            name: name.to_string(),
            message: "no stub available".to_string(),
        })
    }
}

fn attrs(value: serde_json::Value) -> Attributes {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Attributes::new(),
    }
}

/// スクリプトを実行するホスト
struct ScriptedHost {
    engine: Arc<ScriptedEngine>,
    agent: Agent<ScriptedEngine>,
    tests_started: usize,
}

impl ScriptedHost {
    /// ライブラリキーワードを実行する
    fn library_keyword(&mut self, name: &str, args: &[&str]) -> bool {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        let start = json!({"type": "KEYWORD", "kwname": name, "args": args, "doc": ""});
        self.agent.start_keyword(name, &attrs(start));

        let passed = match name {
            "BuiltIn.Log" => {
                let text = args.first().map(|a| self.engine.resolve_arg(a)).unwrap_or_default();
                self.agent
                    .log_message(&attrs(json!({"level": "INFO", "message": text})));
                true
            }
            _ => {
                let short = name.rsplit('.').next().unwrap_or(name);
                self.engine
                    .run_keyword_and_return_status(short, &args)
                    .unwrap_or(false)
            }
        };

        let status = if passed { "PASS" } else { "FAIL" };
        if !passed {
            self.agent.message(&attrs(
                json!({"level": "FAIL", "message": format!("{} failed", name)}),
            ));
        }
        self.agent
            .end_keyword(name, &attrs(json!({"type": "KEYWORD", "status": status})));
        passed
    }

    /// ローカルフレームを持つユーザーキーワードを実行する
    fn user_keyword(&mut self, name: &str, locals: VariableFrame, body: impl FnOnce(&mut Self) -> bool) -> bool {
        self.agent
            .start_keyword(name, &attrs(json!({"type": "KEYWORD", "kwname": name})));
        self.engine.stack.lock().push_local(locals);

        let passed = body(self);

        self.engine.stack.lock().pop_local();
        let status = if passed { "PASS" } else { "FAIL" };
        self.agent
            .end_keyword(name, &attrs(json!({"type": "KEYWORD", "status": status})));
        passed
    }

    fn test(&mut self, name: &str, body: impl FnOnce(&mut Self) -> bool) {
        if self.engine.is_aborted() {
            info!("skipping '{}' after abort", name);
            return;
        }
        self.tests_started += 1;
        let id = format!("s1-t{}", self.tests_started);
        self.agent
            .start_test(name, &attrs(json!({"id": id, "doc": "", "tags": []})));
        self.engine.stack.lock().push_test(VariableFrame::new());

        let passed = body(self) && !self.engine.is_aborted();

        self.engine.stack.lock().pop_test();
        let status = if passed { "PASS" } else { "FAIL" };
        self.agent
            .end_test(name, &attrs(json!({"id": id, "status": status})));
    }

    fn run(&mut self) {
        self.agent.library_import(
            "DemoLibrary",
            &attrs(json!({"args": [], "source": "file:///opt/demo/DemoLibrary.py"})),
        );

        let suite = attrs(json!({"id": "s1", "source": "/opt/demo/greetings.robot", "doc": ""}));
        self.agent.start_suite("Greetings", &suite);
        self.engine
            .stack
            .lock()
            .push_suite(VariableFrame::new().with("${greeting}", Value::str("Hello")));

        self.test("Greets", |host| {
            let locals = VariableFrame::new().with("${name}", Value::str("world"));
            host.user_keyword("Greet", locals, |host| {
                host.library_keyword("BuiltIn.Log", &["${greeting}"])
                    && host.library_keyword("BuiltIn.Log", &["${name}"])
            })
        });

        self.test("Compares", |host| {
            host.library_keyword("BuiltIn.Should Be True", &["${TRUE}"])
                && host.library_keyword("BuiltIn.Should Be Equal", &["${greeting}", "Hi"])
        });

        self.engine.stack.lock().pop_suite();
        self.agent.end_suite("Greetings", &suite);

        self.agent.output_file("/tmp/relay-demo/output.xml");
        self.agent.log_file("/tmp/relay-demo/log.html");
        self.agent.report_file("/tmp/relay-demo/report.html");
        self.agent.close();
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = AgentConfig::new(args.port)
        .with_host(args.host)
        .with_connect_timeout(Duration::from_secs(args.timeout))
        .with_pause_on_failure(args.pause_on_failure);

    let engine = Arc::new(ScriptedEngine::new());
    let agent = Agent::start(config, Arc::clone(&engine));
    match agent.control_port() {
        Some(port) => info!("control listener on port {}", port),
        None => warn!("running without a remote controller"),
    }

    // ライブラリはエージェントのプロキシ経由で解決する
    let proxy = agent.library_proxy(Arc::new(DemoResolver));
    let resolution = proxy.resolve("DemoLibrary", &[]);
    info!(
        "resolved '{}' with {} keywords",
        resolution.library.name(),
        resolution.library.keywords().len()
    );

    let mut host = ScriptedHost {
        engine,
        agent,
        tests_started: 0,
    };
    host.run();
    Ok(())
}

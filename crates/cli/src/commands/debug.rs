//! Interactive debug session

use anyhow::{anyhow, bail, Result};
use clap::Args;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::client::EngineClient;
use crate::config::ClientConfig;
use crate::debugger::Debugger;
use crate::output::{paint_status, print_error, print_info, print_success, print_warning};
use flowdbg_common::{Alert, Context, SessionState, SessionStatus};

#[derive(Args)]
pub struct DebugArgs {
    /// Flow to debug; defaults to `default_flow` from the config file
    pub flow: Option<String>,

    /// Pause before this step (repeatable)
    #[arg(short = 'b', long = "break")]
    pub breakpoints: Vec<String>,

    /// Initial context as a JSON object
    #[arg(long)]
    pub context: Option<String>,

    /// Continue automatically whenever the run pauses
    #[arg(long)]
    pub auto: bool,

    /// Print the annotated Mermaid source instead of the step list
    #[arg(long)]
    pub mermaid: bool,
}

/// One line typed at the debug prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Continue,
    Step,
    Toggle(String),
    Inspect(String),
    Show,
    Stop,
    Help,
}

impl Input {
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let word = parts.next()?;
        let arg = parts.next().map(str::to_string);
        match (word, arg) {
            ("c" | "continue", None) => Some(Self::Continue),
            ("s" | "step", None) => Some(Self::Step),
            ("b" | "break", Some(step)) => Some(Self::Toggle(step)),
            ("i" | "inspect", path) => Some(Self::Inspect(path.unwrap_or_default())),
            ("l" | "show", None) => Some(Self::Show),
            ("q" | "quit" | "stop", None) => Some(Self::Stop),
            ("h" | "help" | "?", None) => Some(Self::Help),
            _ => None,
        }
    }
}

const HELP: &str = "\
  c, continue      run to the next breakpoint
  s, step          run one step and pause
  b, break <id>    toggle a breakpoint
  i, inspect <p>   show a dotted context path
  l, show          redraw the flow
  q, stop          stop the run and quit";

fn parse_context(raw: &str) -> Result<Context> {
    match serde_json::from_str(raw)? {
        serde_json::Value::Object(map) => Ok(map),
        other => bail!("--context must be a JSON object, got {}", other),
    }
}

fn render(debugger: &Debugger, state: &SessionState, mermaid: bool) {
    let step = state.current_step.as_deref().unwrap_or("-");
    println!(
        "\n[{}] step: {}  history: {}",
        paint_status(state.status),
        step,
        state.history.len()
    );
    let drawing = if mermaid {
        debugger.render_mermaid()
    } else {
        debugger.render_text()
    };
    if let Some(drawing) = drawing {
        println!("{}", drawing.trim_end());
    }
}

fn show_alert(alert: &Alert) {
    match alert {
        Alert::Inspection { .. } => print_info(&alert.to_string()),
        _ => print_error(&alert.to_string()),
    }
}

/// Apply one prompt line; returns false once the user asked to stop
fn handle_input(debugger: &mut Debugger, input: Input, mermaid: bool) -> bool {
    let result = match input {
        Input::Continue => debugger.continue_run(),
        Input::Step => debugger.step(),
        Input::Toggle(step_id) => debugger.toggle_breakpoint(&step_id).map(|set| {
            let verb = if set { "set" } else { "cleared" };
            print_info(&format!("Breakpoint {} on {}", verb, step_id));
        }),
        Input::Inspect(path) => debugger.inspect(&path),
        Input::Show => {
            render(debugger, &debugger.state(), mermaid);
            Ok(())
        }
        Input::Stop => {
            if let Err(e) = debugger.stop() {
                print_warning(&e.to_string());
            }
            return false;
        }
        Input::Help => {
            println!("{}", HELP);
            Ok(())
        }
    };
    if let Err(e) = result {
        print_warning(&e.to_string());
    }
    true
}

pub async fn execute(args: DebugArgs, client: EngineClient, config: &ClientConfig) -> Result<()> {
    let flow = args
        .flow
        .or_else(|| config.default_flow.clone())
        .ok_or_else(|| anyhow!("no flow given and no default_flow configured"))?;
    let context = match &args.context {
        Some(raw) => parse_context(raw)?,
        None => config.initial_context.clone(),
    };

    let mut debugger = Debugger::new(client);
    debugger.select_flow(&flow).await?;
    for step_id in &args.breakpoints {
        debugger.toggle_breakpoint(step_id)?;
    }

    let session_id = debugger.start(context).await?.id().to_string();
    print_success(&format!("Debugging {} (session {})", flow, session_id));
    if !args.auto {
        println!("{}", HELP);
    }

    let mut updates = debugger
        .subscribe()
        .ok_or_else(|| anyhow!("session closed before it started"))?;
    render(&debugger, &debugger.state(), args.mermaid);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = updates.borrow_and_update().clone();
                render(&debugger, &state, args.mermaid);

                if state.status == SessionStatus::Paused && args.auto {
                    debugger.continue_run()?;
                }
                if state.status.is_terminal() || state.status == SessionStatus::Disconnected {
                    break;
                }
            }
            Some(alert) = debugger.next_alert() => show_alert(&alert),
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) => match Input::parse(&line) {
                    Some(input) => {
                        if !handle_input(&mut debugger, input, args.mermaid) {
                            break;
                        }
                    }
                    None if line.trim().is_empty() => {}
                    None => print_warning(&format!("Unknown command: {}", line.trim())),
                },
                None if args.auto => stdin_open = false,
                None => {
                    let _ = debugger.stop();
                    break;
                }
            },
        }
    }

    while let Some(alert) = debugger.session_mut().and_then(|s| s.try_alert()) {
        show_alert(&alert);
    }

    let state = debugger.close().await.unwrap_or_default();
    match state.status {
        SessionStatus::Completed => {
            print_success(&format!("Completed {} steps", state.history.len()));
            Ok(())
        }
        SessionStatus::Error => bail!("run ended with an error"),
        status => {
            println!("Session ended: {}", paint_status(status));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("c", Some(Input::Continue) ; "short continue")]
    #[test_case("continue", Some(Input::Continue) ; "long continue")]
    #[test_case("  s  ", Some(Input::Step) ; "padded step")]
    #[test_case("b create_user", Some(Input::Toggle("create_user".to_string())) ; "toggle")]
    #[test_case("b", None ; "toggle needs a step")]
    #[test_case("i user.email", Some(Input::Inspect("user.email".to_string())) ; "inspect path")]
    #[test_case("i", Some(Input::Inspect(String::new())) ; "inspect whole context")]
    #[test_case("q", Some(Input::Stop) ; "quit")]
    #[test_case("c now", None ; "extra argument")]
    #[test_case("", None ; "empty")]
    #[test_case("jump", None ; "unknown")]
    fn test_parse_input(line: &str, expected: Option<Input>) {
        assert_eq!(Input::parse(line), expected);
    }

    #[test]
    fn test_parse_context() {
        let ctx = parse_context(r#"{"email": "a@b.c"}"#).unwrap();
        assert_eq!(ctx["email"], "a@b.c");
        assert!(parse_context("[1, 2]").is_err());
        assert!(parse_context("{").is_err());
    }
}

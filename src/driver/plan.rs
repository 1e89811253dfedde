//! The YAML test-plan schema.
//!
//! Plans deserialize into this closed set of types; an unknown `action` or
//! a field of the wrong shape fails at load time, before anything is
//! launched.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Plan {
    pub group: String,
    pub title: String,
    pub steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case", deny_unknown_fields)]
pub enum Step {
    Launch {
        #[serde(default)]
        options: Vec<String>,
        language: Option<String>,
    },
    WindowNew {
        tag: String,
        url: Option<String>,
    },
    WindowClose {
        window: String,
    },
    Navigate {
        window: String,
        url: Option<String>,
        repeaturl: Option<String>,
    },
    Stop {
        window: String,
    },
    Reload {
        window: String,
    },
    SleepMs {
        time: TimeSpec,
        #[serde(default)]
        conditions: Vec<Condition>,
    },
    Block {
        conditions: Vec<Condition>,
    },
    Repeat {
        tag: String,
        min: Option<i64>,
        step: Option<i64>,
        values: Option<Vec<String>>,
        steps: Vec<Step>,
    },
    TimerStart {
        timer: String,
    },
    TimerRestart {
        timer: String,
    },
    TimerStop {
        timer: String,
    },
    TimerCheck {
        condition: String,
    },
    PlotCheck {
        window: String,
        #[serde(default)]
        checks: Vec<Check>,
    },
    Click {
        window: String,
        x: Option<i32>,
        y: Option<i32>,
        bitmap: Option<usize>,
        button: Option<String>,
        kind: Option<String>,
    },
    AddAuth {
        url: Option<String>,
        realm: Option<String>,
        username: Option<String>,
        password: Option<String>,
    },
    RemoveAuth {
        url: Option<String>,
        realm: Option<String>,
        username: Option<String>,
        password: Option<String>,
    },
    AddCert {
        url: Option<String>,
    },
    RemoveCert {
        url: Option<String>,
    },
    ClearLog {
        window: String,
    },
    WaitLog {
        window: String,
        source: Option<String>,
        foldable: Option<bool>,
        level: Option<String>,
        substring: Option<String>,
    },
    JsExec {
        window: String,
        cmd: String,
    },
    Quit,
}

impl Step {
    /// The step's `action` name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Step::Launch { .. } => "launch",
            Step::WindowNew { .. } => "window-new",
            Step::WindowClose { .. } => "window-close",
            Step::Navigate { .. } => "navigate",
            Step::Stop { .. } => "stop",
            Step::Reload { .. } => "reload",
            Step::SleepMs { .. } => "sleep-ms",
            Step::Block { .. } => "block",
            Step::Repeat { .. } => "repeat",
            Step::TimerStart { .. } => "timer-start",
            Step::TimerRestart { .. } => "timer-restart",
            Step::TimerStop { .. } => "timer-stop",
            Step::TimerCheck { .. } => "timer-check",
            Step::PlotCheck { .. } => "plot-check",
            Step::Click { .. } => "click",
            Step::AddAuth { .. } => "add-auth",
            Step::RemoveAuth { .. } => "remove-auth",
            Step::AddCert { .. } => "add-cert",
            Step::RemoveCert { .. } => "remove-cert",
            Step::ClearLog { .. } => "clear-log",
            Step::WaitLog { .. } => "wait-log",
            Step::JsExec { .. } => "js-exec",
            Step::Quit => "quit",
        }
    }
}

/// `sleep-ms` time: a literal millisecond count, or the name of a repeat
/// whose current index is the millisecond count.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum TimeSpec {
    Ms(u64),
    Repeat(String),
}

/// One waitable condition. Lists of conditions are met when any single one
/// is met.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    /// At least `elapsed` seconds have passed on the named timer.
    Timer { timer: String, elapsed: f64 },
    /// The named window (or `*all*` live windows) has reached `status`;
    /// only `complete` (not throbbing) is supported.
    Window { window: String, status: String },
}

/// One `plot-check` assertion.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Check {
    TextContains {
        #[serde(rename = "text-contains")]
        text: String,
    },
    TextNotContains {
        #[serde(rename = "text-not-contains")]
        text: String,
    },
    BitmapCount {
        #[serde(rename = "bitmap-count")]
        count: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_full_plan_deserializes() {
        let plan: Plan = serde_yaml::from_str(
            r#"
group: example
title: smoke test
steps:
  - action: launch
    options:
      - --enable_javascript=0
    language: en
  - action: window-new
    tag: w
    url: file:///t/index.html
  - action: block
    conditions:
      - window: w
        status: complete
  - action: sleep-ms
    time: 50
    conditions:
      - timer: t
        elapsed: 2
  - action: plot-check
    window: w
    checks:
      - text-contains: Hello
      - text-not-contains: Goodbye
      - bitmap-count: 1
  - action: repeat
    tag: loop
    min: 100
    step: 100
    steps:
      - action: navigate
        window: w
        repeaturl: loop
  - action: window-close
    window: w
  - action: quit
"#,
        )
        .expect("plan should parse");
        assert_eq!(plan.group, "example");
        assert_eq!(plan.steps.len(), 8);
        assert_eq!(plan.steps[0].name(), "launch");
        match &plan.steps[3] {
            Step::SleepMs { time: TimeSpec::Ms(ms), conditions } => {
                assert_eq!(*ms, 50);
                assert_eq!(conditions.len(), 1);
            }
            other => panic!("unexpected step: {other:?}"),
        }
        match &plan.steps[4] {
            Step::PlotCheck { checks, .. } => assert_eq!(checks.len(), 3),
            other => panic!("unexpected step: {other:?}"),
        }
    }

    #[test]
    fn unknown_actions_fail_to_load() {
        let err = serde_yaml::from_str::<Plan>(
            "group: g\ntitle: t\nsteps:\n  - action: summon-demons\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("summon-demons") || err.to_string().contains("variant"));
    }

    #[test]
    fn unknown_step_fields_fail_to_load() {
        // a typo'd key must fail the load, not silently leave a field unset
        let err = serde_yaml::from_str::<Plan>(
            "group: g\ntitle: t\nsteps:\n  - action: navigate\n    window: w\n    ur: file:///t\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("ur"));
    }

    #[test]
    fn sleep_time_accepts_a_repeat_name() {
        let plan: Plan = serde_yaml::from_str(
            "group: g\ntitle: t\nsteps:\n  - action: sleep-ms\n    time: poll\n",
        )
        .expect("plan should parse");
        match &plan.steps[0] {
            Step::SleepMs { time: TimeSpec::Repeat(tag), .. } => assert_eq!(tag, "poll"),
            other => panic!("unexpected step: {other:?}"),
        }
    }
}

//! Declarative test runner: interprets a YAML test plan as a sequence of
//! actions against a [`Browser`] session and verifies observable
//! properties. Thin by design; everything interesting happens in the
//! session layer.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, ensure, Context};
use futures::future::LocalBoxFuture;
use futures::FutureExt;

use crate::browser::{Browser, BrowserConfig, LogFilter};
use crate::protocol::{ClickKind, MouseButton, PlotCmd};
use crate::window::WindowId;

mod plan;

pub use self::plan::{Check, Condition, Plan, Step, TimeSpec};

/// Read and deserialize a test plan.
pub fn load_plan(path: &Path) -> anyhow::Result<Plan> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

struct TimerState {
    start: Instant,
    taken: Option<Duration>,
}

struct RepeatState {
    index: i64,
    step: i64,
    values: Option<Vec<String>>,
    looping: bool,
    /// When the current iteration of the repeat body began.
    start: Instant,
}

/// Interpreter state for one plan run.
pub struct Driver {
    monkey: PathBuf,
    wrapper: Vec<String>,
    browser: Option<Browser>,
    windows: HashMap<String, WindowId>,
    timers: HashMap<String, TimerState>,
    repeats: HashMap<String, RepeatState>,
    depth: usize,
}

impl Driver {
    pub fn new(monkey: impl Into<PathBuf>, wrapper: Vec<String>) -> Self {
        Self {
            monkey: monkey.into(),
            wrapper,
            browser: None,
            windows: HashMap::new(),
            timers: HashMap::new(),
            repeats: HashMap::new(),
            depth: 0,
        }
    }

    pub async fn run(&mut self, plan: &Plan) -> anyhow::Result<()> {
        tracing::info!("running test: [{}] {}", plan.group, plan.title);
        for step in &plan.steps {
            self.run_step(step).await?;
        }
        Ok(())
    }

    fn assert_browser(&self) -> anyhow::Result<&Browser> {
        let browser = self.browser.as_ref().context("no browser launched")?;
        ensure!(
            browser.started() && !browser.stopped(),
            "browser session is stopped"
        );
        Ok(browser)
    }

    fn browser_mut(&mut self) -> anyhow::Result<&mut Browser> {
        self.browser.as_mut().context("no browser launched")
    }

    fn window_id(&self, tag: &str) -> anyhow::Result<WindowId> {
        self.windows
            .get(tag)
            .cloned()
            .with_context(|| format!("unknown window tag {tag:?}"))
    }

    /// OR over the condition list: met as soon as any single condition is.
    fn conds_met(&self, conds: &[Condition]) -> anyhow::Result<bool> {
        for cond in conds {
            match cond {
                Condition::Timer { timer, elapsed } => {
                    self.assert_browser()?;
                    let state = self
                        .timers
                        .get(timer)
                        .with_context(|| format!("unknown timer {timer:?}"))?;
                    if state.start.elapsed().as_secs_f64() >= *elapsed {
                        return Ok(true);
                    }
                }
                Condition::Window { window, status } => {
                    ensure!(status == "complete", "unsupported window status {status:?}");
                    let browser = self.assert_browser()?;
                    if window == "*all*" {
                        if browser.alive_windows().all(|win| !win.throbbing()) {
                            return Ok(true);
                        }
                    } else {
                        let id = self.window_id(window)?;
                        let win = browser
                            .window(&id)
                            .with_context(|| format!("window {window:?} vanished"))?;
                        if !win.throbbing() {
                            return Ok(true);
                        }
                    }
                }
            }
        }
        Ok(false)
    }

    /// The earliest instant at which a timer condition could become met.
    fn next_timer_deadline(&self, conds: &[Condition]) -> Option<Instant> {
        conds
            .iter()
            .filter_map(|cond| match cond {
                Condition::Timer { timer, elapsed } => self
                    .timers
                    .get(timer)
                    .map(|state| state.start + Duration::from_secs_f64(*elapsed)),
                Condition::Window { .. } => None,
            })
            .min()
    }

    fn run_step<'a>(&'a mut self, step: &'a Step) -> LocalBoxFuture<'a, anyhow::Result<()>> {
        async move {
            let indent = "  ".repeat(self.depth);
            tracing::info!("{indent}action: {}", step.name());
            match step {
                Step::Launch { options, language } => {
                    ensure!(self.browser.is_none(), "browser already launched");
                    let mut builder = BrowserConfig::builder()
                        .executable(&self.monkey)
                        .wrapper(self.wrapper.iter().cloned());
                    if let Some(language) = language {
                        builder = builder.language(language.as_str());
                    }
                    let config = builder.build().map_err(anyhow::Error::msg)?;
                    let mut browser = Browser::launch(config)?;
                    for option in options {
                        tracing::info!("        {option}");
                        browser.pass_options([option.as_str()])?;
                    }
                    self.browser = Some(browser);
                }
                Step::WindowNew { tag, url } => {
                    self.assert_browser()?;
                    ensure!(
                        !self.windows.contains_key(tag),
                        "window tag {tag:?} already in use"
                    );
                    let id = self.browser_mut()?.new_window(url.as_deref()).await?;
                    self.windows.insert(tag.clone(), id);
                }
                Step::WindowClose { window } => {
                    self.assert_browser()?;
                    let id = self
                        .windows
                        .remove(window)
                        .with_context(|| format!("unknown window tag {window:?}"))?;
                    let browser = self.browser_mut()?;
                    browser.kill(&id)?;
                    browser.wait_until_dead(&id, None).await?;
                    let win = browser.window(&id).context("window vanished")?;
                    ensure!(!win.alive(), "window survived destruction");
                }
                Step::Navigate { window, url, repeaturl } => {
                    self.assert_browser()?;
                    let url = match (url, repeaturl) {
                        (Some(url), _) => url.clone(),
                        (None, Some(tag)) => {
                            let repeat = self
                                .repeats
                                .get(tag)
                                .with_context(|| format!("unknown repeat {tag:?}"))?;
                            let values = repeat
                                .values
                                .as_ref()
                                .with_context(|| format!("repeat {tag:?} has no values"))?;
                            let index = usize::try_from(repeat.index)
                                .ok()
                                .filter(|index| *index < values.len())
                                .with_context(|| format!("repeat {tag:?} index out of range"))?;
                            values[index].clone()
                        }
                        (None, None) => bail!("navigate needs a url or a repeaturl"),
                    };
                    let id = self.window_id(window)?;
                    tracing::info!("        {window} --> {url}");
                    self.browser_mut()?.go(&id, &url, None)?;
                }
                Step::Stop { window } => {
                    self.assert_browser()?;
                    let id = self.window_id(window)?;
                    self.browser_mut()?.stop(&id)?;
                }
                Step::Reload { window } => {
                    self.assert_browser()?;
                    let id = self.window_id(window)?;
                    self.browser_mut()?.reload(&id)?;
                }
                Step::SleepMs { time, conditions } => {
                    self.assert_browser()?;
                    let (limit, start, repeat_tag) = match time {
                        TimeSpec::Ms(ms) => (Duration::from_millis(*ms), Instant::now(), None),
                        TimeSpec::Repeat(tag) => {
                            let repeat = self
                                .repeats
                                .get(tag)
                                .with_context(|| format!("unknown repeat {tag:?}"))?;
                            let ms = u64::try_from(repeat.index).unwrap_or(0);
                            (Duration::from_millis(ms), repeat.start, Some(tag.clone()))
                        }
                    };
                    loop {
                        let slept = start.elapsed();
                        if self.conds_met(conditions)? {
                            if let Some(tag) = &repeat_tag {
                                if let Some(repeat) = self.repeats.get_mut(tag) {
                                    repeat.looping = false;
                                }
                            }
                            tracing::info!(
                                "        condition met after {:.2}s",
                                slept.as_secs_f64()
                            );
                            break;
                        }
                        if slept > limit {
                            tracing::info!(
                                "        condition not met after {:.2}s",
                                limit.as_secs_f64()
                            );
                            break;
                        }
                        let deadline = self
                            .next_timer_deadline(conditions)
                            .map_or(start + limit, |timer| timer.min(start + limit));
                        self.browser_mut()?.pump_once_until(deadline).await;
                    }
                }
                Step::Block { conditions } => {
                    self.assert_browser()?;
                    while !self.conds_met(conditions)? {
                        match self.next_timer_deadline(conditions) {
                            Some(deadline) => {
                                self.browser_mut()?.pump_once_until(deadline).await
                            }
                            None => self.browser_mut()?.pump_once().await,
                        }
                    }
                }
                Step::Repeat { tag, min, step, values, steps } => {
                    ensure!(
                        !self.repeats.contains_key(tag),
                        "repeat tag {tag:?} already in use"
                    );
                    self.repeats.insert(
                        tag.clone(),
                        RepeatState {
                            index: min.unwrap_or(0),
                            step: step.unwrap_or(1),
                            values: values.clone(),
                            looping: true,
                            start: Instant::now(),
                        },
                    );
                    loop {
                        {
                            let repeat = self.repeats.get_mut(tag).expect("repeat inserted above");
                            if !repeat.looping {
                                break;
                            }
                            repeat.start = Instant::now();
                        }
                        self.depth += 1;
                        let mut result = Ok(());
                        for inner in steps {
                            result = self.run_step(inner).await;
                            if result.is_err() {
                                break;
                            }
                        }
                        self.depth -= 1;
                        result?;
                        let repeat = self.repeats.get_mut(tag).expect("repeat inserted above");
                        repeat.index += repeat.step;
                        if let Some(values) = &repeat.values {
                            if repeat.index < 0 || repeat.index as usize >= values.len() {
                                repeat.looping = false;
                            }
                        }
                    }
                }
                Step::TimerStart { timer } => {
                    self.assert_browser()?;
                    ensure!(
                        !self.timers.contains_key(timer),
                        "timer {timer:?} already started"
                    );
                    self.timers
                        .insert(timer.clone(), TimerState { start: Instant::now(), taken: None });
                }
                Step::TimerRestart { timer } => {
                    self.assert_browser()?;
                    let state = self
                        .timers
                        .get_mut(timer)
                        .with_context(|| format!("unknown timer {timer:?}"))?;
                    let taken = state.start.elapsed();
                    tracing::info!("        {timer} restarted at: {:.2}s", taken.as_secs_f64());
                    state.taken = Some(taken);
                    state.start = Instant::now();
                }
                Step::TimerStop { timer } => {
                    self.assert_browser()?;
                    let state = self
                        .timers
                        .get_mut(timer)
                        .with_context(|| format!("unknown timer {timer:?}"))?;
                    let taken = state.start.elapsed();
                    tracing::info!("        {timer} took: {:.2}s", taken.as_secs_f64());
                    state.taken = Some(taken);
                }
                Step::TimerCheck { condition } => {
                    let parts: Vec<&str> = condition.split_whitespace().collect();
                    ensure!(parts.len() == 3, "malformed timer-check condition {condition:?}");
                    let taken = |name: &str| -> anyhow::Result<Duration> {
                        self.timers
                            .get(name)
                            .with_context(|| format!("unknown timer {name:?}"))?
                            .taken
                            .with_context(|| format!("timer {name:?} never stopped"))
                    };
                    let lhs = taken(parts[0])?;
                    let rhs = taken(parts[2])?;
                    match parts[1] {
                        "<" => ensure!(lhs < rhs, "timer check failed: {condition}"),
                        ">" => ensure!(lhs > rhs, "timer check failed: {condition}"),
                        op => bail!("unsupported timer-check operator {op:?}"),
                    }
                }
                Step::PlotCheck { window, checks } => {
                    self.assert_browser()?;
                    let id = self.window_id(window)?;
                    let plots = self.browser_mut()?.redraw(&id, None, None).await?;
                    let mut texts: Vec<&str> = Vec::new();
                    let mut bitmaps = Vec::new();
                    for plot in &plots {
                        match plot {
                            PlotCmd::Text { text, .. } => texts.push(text.as_str()),
                            PlotCmd::Bitmap { .. } => {
                                bitmaps.push(plot.bitmap_rect().expect("bitmap plot"))
                            }
                            PlotCmd::Other { .. } => {}
                        }
                    }
                    let all_text = texts.join(" ");
                    for check in checks {
                        match check {
                            Check::TextContains { text } => {
                                tracing::info!("        check {text:?} in plotted text");
                                ensure!(
                                    all_text.contains(text),
                                    "{text:?} not found in plotted text {all_text:?}"
                                );
                            }
                            Check::TextNotContains { text } => {
                                tracing::info!("        check {text:?} not in plotted text");
                                ensure!(
                                    !all_text.contains(text),
                                    "{text:?} unexpectedly found in plotted text {all_text:?}"
                                );
                            }
                            Check::BitmapCount { count } => {
                                tracing::info!("        check bitmap count is {count}");
                                ensure!(
                                    bitmaps.len() == *count,
                                    "expected {count} bitmaps, found {}",
                                    bitmaps.len()
                                );
                            }
                        }
                    }
                }
                Step::Click { window, x, y, bitmap, button, kind } => {
                    self.assert_browser()?;
                    let id = self.window_id(window)?;
                    let button = parse_button(button.as_deref())?;
                    let kind = parse_kind(kind.as_deref())?;
                    let (x, y) = match bitmap {
                        Some(index) => {
                            let plots = self.browser_mut()?.redraw(&id, None, None).await?;
                            let rects: Vec<_> =
                                plots.iter().filter_map(PlotCmd::bitmap_rect).collect();
                            let (bx, by, bw, bh) =
                                *rects.get(*index).with_context(|| {
                                    format!(
                                        "bitmap index {index} out of range ({} bitmaps)",
                                        rects.len()
                                    )
                                })?;
                            (bx + bw / 2, by + bh / 2)
                        }
                        None => (
                            x.context("click needs x or a bitmap index")?,
                            y.context("click needs y or a bitmap index")?,
                        ),
                    };
                    self.browser_mut()?.click(&id, x, y, button, kind)?;
                }
                Step::AddAuth { url, realm, username, password } => {
                    self.assert_browser()?;
                    self.browser_mut()?.add_auth(
                        url.as_deref(),
                        realm.as_deref(),
                        username.as_deref(),
                        password.as_deref(),
                    );
                }
                Step::RemoveAuth { url, realm, username, password } => {
                    self.assert_browser()?;
                    self.browser_mut()?.remove_auth(
                        url.as_deref(),
                        realm.as_deref(),
                        username.as_deref(),
                        password.as_deref(),
                    );
                }
                Step::AddCert { url } => {
                    self.assert_browser()?;
                    self.browser_mut()?.add_cert(url.as_deref());
                }
                Step::RemoveCert { url } => {
                    self.assert_browser()?;
                    self.browser_mut()?.remove_cert(url.as_deref());
                }
                Step::ClearLog { window } => {
                    self.assert_browser()?;
                    let id = self.window_id(window)?;
                    tracing::info!("        {window} log cleared");
                    self.browser_mut()?.clear_log(&id)?;
                }
                Step::WaitLog { window, source, foldable, level, substring } => {
                    self.assert_browser()?;
                    let id = self.window_id(window)?;
                    let filter = LogFilter {
                        source: source.clone(),
                        foldable: *foldable,
                        level: level.clone(),
                        substring: substring.clone(),
                    };
                    tracing::info!("        {window} wait for logging");
                    self.browser_mut()?.wait_for_log(&id, filter, None).await?;
                }
                Step::JsExec { window, cmd } => {
                    self.assert_browser()?;
                    let id = self.window_id(window)?;
                    tracing::info!("        {window} run {cmd}");
                    self.browser_mut()?.js_exec(&id, cmd)?;
                }
                Step::Quit => {
                    self.assert_browser()?;
                    let mut browser = self.browser.take().expect("asserted above");
                    let clean = browser.quit_and_wait(None).await?;
                    ensure!(clean, "browser child exited uncleanly");
                    self.windows.clear();
                }
            }
            Ok(())
        }
        .boxed_local()
    }
}

fn parse_button(token: Option<&str>) -> anyhow::Result<MouseButton> {
    match token {
        None => Ok(MouseButton::Left),
        Some(token) if token.eq_ignore_ascii_case("LEFT") => Ok(MouseButton::Left),
        Some(token) if token.eq_ignore_ascii_case("RIGHT") => Ok(MouseButton::Right),
        Some(token) if token.eq_ignore_ascii_case("MIDDLE") => Ok(MouseButton::Middle),
        Some(token) => bail!("unsupported mouse button {token:?}"),
    }
}

fn parse_kind(token: Option<&str>) -> anyhow::Result<ClickKind> {
    match token {
        None => Ok(ClickKind::Single),
        Some(token) if token.eq_ignore_ascii_case("SINGLE") => Ok(ClickKind::Single),
        Some(token) if token.eq_ignore_ascii_case("DOUBLE") => Ok(ClickKind::Double),
        Some(token) if token.eq_ignore_ascii_case("TRIPLE") => Ok(ClickKind::Triple),
        Some(token) => bail!("unsupported click kind {token:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn button_and_kind_tokens_parse() {
        assert_eq!(parse_button(None).unwrap(), MouseButton::Left);
        assert_eq!(parse_button(Some("right")).unwrap(), MouseButton::Right);
        assert!(parse_button(Some("FOURTH")).is_err());
        assert_eq!(parse_kind(Some("DOUBLE")).unwrap(), ClickKind::Double);
        assert!(parse_kind(Some("QUAD")).is_err());
    }

    #[test]
    fn steps_before_launch_are_rejected() {
        let mut driver = Driver::new("/nonexistent/monkey", Vec::new());
        let step = Step::Quit;
        let err = futures::executor::block_on(driver.run_step(&step)).unwrap_err();
        assert!(err.to_string().contains("no browser launched"));
    }
}

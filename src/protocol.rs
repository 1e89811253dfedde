//! The wire grammar spoken with the browser child.
//!
//! Lines are ASCII, whitespace-tokenized, first token is the tag. Most
//! messages interleave key tokens with value tokens; a few keys (`str`,
//! `message`) take everything after them as a free-form string. Each message
//! declares its schema as data so tolerance rules are uniform: unknown tags
//! and subcommands are ignored, unknown keys are skipped with their value
//! token, and a known tag missing a required field is a [`ProtocolError`].

use std::fmt;

use thiserror::Error;

/// A line that parsed to a known tag but not to a valid message. The pump
/// logs these and carries on; the child is allowed to evolve additively.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed {tag} line ({reason}): {line:?}")]
pub struct ProtocolError {
    pub tag: String,
    pub reason: String,
    pub line: String,
}

/// A parsed inbound line.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Window { id: String, event: WindowEvent },
    Plot(PlotCmd),
    LoginReady { id: String, url: String, realm: String, username: String },
    SslCertReady { id: String, url: String },
    Log { win: Option<String>, record: LogRecord },
    PageInfoState { id: String, state: String },
    Generic,
    Quit,
}

/// A window-scoped inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum WindowEvent {
    New { coreid: String, existing: String, newtab: bool, clone: bool },
    Destroy,
    Size { width: i32, height: i32 },
    Title(String),
    RedrawStart,
    RedrawStop,
    GetDimensions { width: i32, height: i32 },
    NewContent,
    NewIcon,
    StartThrobber,
    StopThrobber,
    SetScroll { x: i32, y: i32 },
    UpdateBox,
    UpdateExtent { width: i32, height: i32 },
    SetStatus(String),
    SetPointer(String),
    SetScale(f64),
    SetUrl(String),
    GetScroll { x: i32, y: i32 },
    ScrollStart,
}

/// One drawing instruction captured during a redraw.
#[derive(Debug, Clone, PartialEq)]
pub enum PlotCmd {
    Text { x: i32, y: i32, text: String },
    Bitmap { x: i32, y: i32, width: i32, height: i32 },
    /// Any plot subcommand this crate has no structured reading for.
    Other { tag: String, args: Vec<String> },
}

impl PlotCmd {
    /// The text payload, for TEXT plots.
    pub fn text(&self) -> Option<&str> {
        match self {
            PlotCmd::Text { text, .. } => Some(text),
            _ => None,
        }
    }

    /// The rectangle `(x, y, width, height)`, for BITMAP plots.
    pub fn bitmap_rect(&self) -> Option<(i32, i32, i32, i32)> {
        match self {
            PlotCmd::Bitmap { x, y, width, height } => Some((*x, *y, *width, *height)),
            _ => None,
        }
    }
}

/// One console/log record reported by the child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub source: String,
    pub foldable: bool,
    pub level: String,
    pub message: String,
}

/// Mouse button for `WINDOW CLICK`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

impl fmt::Display for MouseButton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MouseButton::Left => "LEFT",
            MouseButton::Right => "RIGHT",
            MouseButton::Middle => "MIDDLE",
        })
    }
}

/// Click multiplicity for `WINDOW CLICK`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickKind {
    Single,
    Double,
    Triple,
}

impl fmt::Display for ClickKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ClickKind::Single => "SINGLE",
            ClickKind::Double => "DOUBLE",
            ClickKind::Triple => "TRIPLE",
        })
    }
}

#[derive(Clone, Copy)]
struct Tokens<'a> {
    rest: &'a str,
}

impl<'a> Tokens<'a> {
    fn new(line: &'a str) -> Self {
        Self { rest: line }
    }

    fn next(&mut self) -> Option<&'a str> {
        let trimmed = self.rest.trim_start();
        if trimmed.is_empty() {
            self.rest = trimmed;
            return None;
        }
        match trimmed.find(char::is_whitespace) {
            Some(end) => {
                self.rest = &trimmed[end..];
                Some(&trimmed[..end])
            }
            None => {
                self.rest = "";
                Some(trimmed)
            }
        }
    }

    /// Everything left on the line, leading whitespace stripped.
    fn take_rest(&mut self) -> &'a str {
        let rest = self.rest.trim_start();
        self.rest = "";
        rest
    }
}

#[derive(Clone, Copy)]
enum FieldKind {
    /// The key is followed by exactly one value token.
    Single,
    /// The key is followed by the remainder of the line.
    Rest,
}

struct FieldSpec {
    key: &'static str,
    kind: FieldKind,
}

const fn single(key: &'static str) -> FieldSpec {
    FieldSpec { key, kind: FieldKind::Single }
}

const fn rest(key: &'static str) -> FieldSpec {
    FieldSpec { key, kind: FieldKind::Rest }
}

struct Fields<'a> {
    values: Vec<(&'static str, &'a str)>,
}

impl<'a> Fields<'a> {
    fn get(&self, key: &str) -> Option<&'a str> {
        self.values
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| *v)
    }

    fn require(&self, key: &'static str) -> Result<&'a str, String> {
        self.get(key).ok_or_else(|| format!("missing {key}"))
    }

    fn require_i32(&self, key: &'static str) -> Result<i32, String> {
        self.require(key)?
            .parse()
            .map_err(|_| format!("bad integer for {key}"))
    }

    fn require_f64(&self, key: &'static str) -> Result<f64, String> {
        self.require(key)?
            .parse()
            .map_err(|_| format!("bad number for {key}"))
    }
}

/// Scan key/value pairs against a message schema. Unknown keys are skipped
/// along with their value token; a `rest` key consumes the remaining line.
fn scan_fields<'a>(tokens: &mut Tokens<'a>, schema: &[FieldSpec]) -> Fields<'a> {
    let mut fields = Fields { values: Vec::new() };
    while let Some(key) = tokens.next() {
        match schema.iter().find(|spec| spec.key == key) {
            Some(spec) => match spec.kind {
                FieldKind::Single => {
                    if let Some(value) = tokens.next() {
                        fields.values.push((spec.key, value));
                    }
                }
                FieldKind::Rest => {
                    fields.values.push((spec.key, tokens.take_rest()));
                    break;
                }
            },
            None => {
                let _ = tokens.next();
            }
        }
    }
    fields
}

fn flag(token: &str) -> bool {
    token == "TRUE"
}

impl Inbound {
    /// Parse one inbound line. `Ok(None)` means the tag (or subcommand) is
    /// unknown and the line is to be ignored.
    pub fn parse(line: &str) -> Result<Option<Inbound>, ProtocolError> {
        let mut tokens = Tokens::new(line);
        let tag = match tokens.next() {
            Some(tag) => tag,
            None => return Ok(None),
        };
        let fail = |reason: String| ProtocolError {
            tag: tag.to_string(),
            reason,
            line: line.to_string(),
        };
        match tag {
            "WINDOW" => {
                let sub = tokens.next().ok_or_else(|| fail("missing subcommand".into()))?;
                let id = tokens.next().ok_or_else(|| fail("missing window id".into()))?;
                match parse_window_event(sub, &mut tokens).map_err(fail)? {
                    Some(event) => Ok(Some(Inbound::Window { id: id.to_string(), event })),
                    None => Ok(None),
                }
            }
            "PLOT" => {
                let sub = tokens.next().ok_or_else(|| fail("missing plot subcommand".into()))?;
                Ok(Some(Inbound::Plot(parse_plot(sub, &mut tokens).map_err(fail)?)))
            }
            "LOGIN" => {
                match tokens.next() {
                    Some("READY") => {}
                    _ => return Ok(None),
                }
                let id = tokens.next().ok_or_else(|| fail("missing login id".into()))?;
                let fields = scan_fields(
                    &mut tokens,
                    &[single("url"), single("realm"), single("username")],
                );
                Ok(Some(Inbound::LoginReady {
                    id: id.to_string(),
                    url: fields.require("url").map_err(fail)?.to_string(),
                    realm: fields.get("realm").unwrap_or_default().to_string(),
                    username: fields.get("username").unwrap_or_default().to_string(),
                }))
            }
            "SSLCERT" => {
                match tokens.next() {
                    Some("READY") => {}
                    _ => return Ok(None),
                }
                let id = tokens.next().ok_or_else(|| fail("missing cert id".into()))?;
                let fields = scan_fields(&mut tokens, &[single("url")]);
                Ok(Some(Inbound::SslCertReady {
                    id: id.to_string(),
                    url: fields.require("url").map_err(fail)?.to_string(),
                }))
            }
            "LOG" => {
                let fields = scan_fields(
                    &mut tokens,
                    &[
                        single("win"),
                        single("source"),
                        single("foldable"),
                        single("level"),
                        rest("message"),
                    ],
                );
                Ok(Some(Inbound::Log {
                    win: fields.get("win").map(str::to_string),
                    record: LogRecord {
                        source: fields.require("source").map_err(fail)?.to_string(),
                        foldable: flag(fields.get("foldable").unwrap_or("FALSE")),
                        level: fields.require("level").map_err(fail)?.to_string(),
                        message: fields.get("message").unwrap_or_default().to_string(),
                    },
                }))
            }
            "PAGE_INFO_STATE" => {
                let id = tokens.next().ok_or_else(|| fail("missing window id".into()))?;
                let fields = scan_fields(&mut tokens, &[single("state")]);
                Ok(Some(Inbound::PageInfoState {
                    id: id.to_string(),
                    state: fields.require("state").map_err(fail)?.to_string(),
                }))
            }
            "GENERIC" => Ok(Some(Inbound::Generic)),
            "QUIT" => Ok(Some(Inbound::Quit)),
            _ => Ok(None),
        }
    }
}

fn parse_window_event(sub: &str, tokens: &mut Tokens<'_>) -> Result<Option<WindowEvent>, String> {
    let event = match sub {
        "NEW" => {
            let fields = scan_fields(
                tokens,
                &[single("for"), single("existing"), single("newtab"), single("clone")],
            );
            WindowEvent::New {
                coreid: fields.get("for").unwrap_or_default().to_string(),
                existing: fields.get("existing").unwrap_or_default().to_string(),
                newtab: flag(fields.get("newtab").unwrap_or("FALSE")),
                clone: flag(fields.get("clone").unwrap_or("FALSE")),
            }
        }
        "DESTROY" => WindowEvent::Destroy,
        "SIZE" => {
            let fields = scan_fields(tokens, &[single("width"), single("height")]);
            WindowEvent::Size {
                width: fields.require_i32("width")?,
                height: fields.require_i32("height")?,
            }
        }
        "TITLE" => {
            let fields = scan_fields(tokens, &[rest("str")]);
            WindowEvent::Title(fields.require("str")?.to_string())
        }
        "REDRAW" => match tokens.next() {
            Some("START") => WindowEvent::RedrawStart,
            Some("STOP") => WindowEvent::RedrawStop,
            _ => return Err("expected START or STOP".into()),
        },
        "GET_DIMENSIONS" => {
            let fields = scan_fields(tokens, &[single("width"), single("height")]);
            WindowEvent::GetDimensions {
                width: fields.require_i32("width")?,
                height: fields.require_i32("height")?,
            }
        }
        "NEW_CONTENT" => WindowEvent::NewContent,
        "NEW_ICON" => WindowEvent::NewIcon,
        "START_THROBBER" => WindowEvent::StartThrobber,
        "STOP_THROBBER" => WindowEvent::StopThrobber,
        "SET_SCROLL" => {
            let fields = scan_fields(tokens, &[single("x"), single("y")]);
            WindowEvent::SetScroll {
                x: fields.require_i32("x")?,
                y: fields.require_i32("y")?,
            }
        }
        "UPDATE_BOX" => WindowEvent::UpdateBox,
        "UPDATE_EXTENT" => {
            let fields = scan_fields(tokens, &[single("width"), single("height")]);
            WindowEvent::UpdateExtent {
                width: fields.require_i32("width")?,
                height: fields.require_i32("height")?,
            }
        }
        "SET_STATUS" => {
            let fields = scan_fields(tokens, &[rest("str")]);
            WindowEvent::SetStatus(fields.require("str")?.to_string())
        }
        "SET_POINTER" => {
            let fields = scan_fields(tokens, &[single("pointer")]);
            WindowEvent::SetPointer(fields.require("pointer")?.to_string())
        }
        "SET_SCALE" => {
            let fields = scan_fields(tokens, &[single("scale")]);
            WindowEvent::SetScale(fields.require_f64("scale")?)
        }
        "SET_URL" => {
            let fields = scan_fields(tokens, &[single("url")]);
            WindowEvent::SetUrl(fields.require("url")?.to_string())
        }
        "GET_SCROLL" => {
            let fields = scan_fields(tokens, &[single("x"), single("y")]);
            WindowEvent::GetScroll {
                x: fields.require_i32("x")?,
                y: fields.require_i32("y")?,
            }
        }
        "SCROLL_START" => WindowEvent::ScrollStart,
        _ => return Ok(None),
    };
    Ok(Some(event))
}

fn parse_plot(sub: &str, tokens: &mut Tokens<'_>) -> Result<PlotCmd, String> {
    match sub {
        "TEXT" => {
            let fields = scan_fields(tokens, &[single("x"), single("y"), rest("str")]);
            Ok(PlotCmd::Text {
                x: fields.require_i32("x")?,
                y: fields.require_i32("y")?,
                text: fields.get("str").unwrap_or_default().to_string(),
            })
        }
        "BITMAP" => {
            let fields = scan_fields(
                tokens,
                &[single("x"), single("y"), single("width"), single("height")],
            );
            Ok(PlotCmd::Bitmap {
                x: fields.require_i32("x")?,
                y: fields.require_i32("y")?,
                width: fields.require_i32("width")?,
                height: fields.require_i32("height")?,
            })
        }
        other => {
            let mut args = Vec::new();
            while let Some(token) = tokens.next() {
                args.push(token.to_string());
            }
            Ok(PlotCmd::Other { tag: other.to_string(), args })
        }
    }
}

/// Outbound command encoders. One function per line the controller sends.
pub(crate) mod cmd {
    use super::{ClickKind, MouseButton};

    pub const QUIT: &str = "QUIT";

    pub fn options(opts: &[String]) -> String {
        format!("OPTIONS {}", opts.join(" "))
    }

    pub fn window_new(url: Option<&str>) -> String {
        match url {
            Some(url) => format!("WINDOW NEW {url}"),
            None => "WINDOW NEW".to_string(),
        }
    }

    pub fn window_go(id: &str, url: &str, referer: Option<&str>) -> String {
        match referer {
            Some(referer) => format!("WINDOW GO {id} {url} {referer}"),
            None => format!("WINDOW GO {id} {url}"),
        }
    }

    pub fn window_reload(id: &str) -> String {
        format!("WINDOW RELOAD {id}")
    }

    pub fn window_stop(id: &str) -> String {
        format!("WINDOW STOP {id}")
    }

    pub fn window_destroy(id: &str) -> String {
        format!("WINDOW DESTROY {id}")
    }

    pub fn window_redraw(id: &str, coords: Option<[i32; 4]>) -> String {
        match coords {
            Some([x0, y0, x1, y1]) => format!("WINDOW REDRAW {id} {x0} {y0} {x1} {y1}"),
            None => format!("WINDOW REDRAW {id}"),
        }
    }

    pub fn window_click(id: &str, x: i32, y: i32, button: MouseButton, kind: ClickKind) -> String {
        format!("WINDOW CLICK {id} x {x} y {y} button {button} kind {kind}")
    }

    pub fn window_exec(id: &str, js: &str) -> String {
        format!("WINDOW EXEC {id} {js}")
    }

    pub fn login_username(id: &str, username: &str) -> String {
        format!("LOGIN USERNAME {id} {username}")
    }

    pub fn login_password(id: &str, password: &str) -> String {
        format!("LOGIN PASSWORD {id} {password}")
    }

    pub fn login_go(id: &str) -> String {
        format!("LOGIN GO {id}")
    }

    pub fn login_destroy(id: &str) -> String {
        format!("LOGIN DESTROY {id}")
    }

    pub fn sslcert_go(id: &str) -> String {
        format!("SSLCERT GO {id}")
    }

    pub fn sslcert_destroy(id: &str) -> String {
        format!("SSLCERT DESTROY {id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Option<Inbound> {
        Inbound::parse(line).expect("line should parse")
    }

    #[test]
    fn window_size_parses() {
        let ev = parse("WINDOW SIZE win0 width 800 height 600").unwrap();
        assert_eq!(
            ev,
            Inbound::Window {
                id: "win0".into(),
                event: WindowEvent::Size { width: 800, height: 600 },
            }
        );
    }

    #[test]
    fn unknown_keys_are_tolerated() {
        let ev = parse("WINDOW SIZE win0 shiny yes width 10 height 20").unwrap();
        assert_eq!(
            ev,
            Inbound::Window {
                id: "win0".into(),
                event: WindowEvent::Size { width: 10, height: 20 },
            }
        );
    }

    #[test]
    fn title_takes_rest_of_line() {
        let ev = parse("WINDOW TITLE win0 str A page  with   spaces").unwrap();
        assert_eq!(
            ev,
            Inbound::Window {
                id: "win0".into(),
                event: WindowEvent::Title("A page  with   spaces".into()),
            }
        );
    }

    #[test]
    fn missing_field_is_a_protocol_error() {
        let err = Inbound::parse("WINDOW SIZE win0 width 800").unwrap_err();
        assert_eq!(err.tag, "WINDOW");
        assert!(err.reason.contains("height"));
    }

    #[test]
    fn bad_integer_is_a_protocol_error() {
        assert!(Inbound::parse("WINDOW SIZE win0 width eight height 600").is_err());
    }

    #[test]
    fn unknown_tag_is_ignored() {
        assert_eq!(Inbound::parse("FROBNICATE all the things").unwrap(), None);
        assert_eq!(Inbound::parse("").unwrap(), None);
    }

    #[test]
    fn unknown_window_subcommand_is_ignored() {
        assert_eq!(Inbound::parse("WINDOW TELEPORT win0 x 1 y 2").unwrap(), None);
    }

    #[test]
    fn window_new_parses_flags() {
        let ev = parse("WINDOW NEW win1 for core7 existing win0 newtab TRUE clone FALSE").unwrap();
        assert_eq!(
            ev,
            Inbound::Window {
                id: "win1".into(),
                event: WindowEvent::New {
                    coreid: "core7".into(),
                    existing: "win0".into(),
                    newtab: true,
                    clone: false,
                },
            }
        );
    }

    #[test]
    fn redraw_brackets_parse() {
        assert_eq!(
            parse("WINDOW REDRAW win0 START").unwrap(),
            Inbound::Window { id: "win0".into(), event: WindowEvent::RedrawStart }
        );
        assert_eq!(
            parse("WINDOW REDRAW win0 STOP").unwrap(),
            Inbound::Window { id: "win0".into(), event: WindowEvent::RedrawStop }
        );
        assert!(Inbound::parse("WINDOW REDRAW win0 SIDEWAYS").is_err());
    }

    #[test]
    fn plot_text_parses() {
        let ev = parse("PLOT TEXT x 10 y 20 str Hello, world").unwrap();
        assert_eq!(
            ev,
            Inbound::Plot(PlotCmd::Text { x: 10, y: 20, text: "Hello, world".into() })
        );
    }

    #[test]
    fn plot_bitmap_parses() {
        let ev = parse("PLOT BITMAP x 1 y 2 width 32 height 16").unwrap();
        assert_eq!(
            ev,
            Inbound::Plot(PlotCmd::Bitmap { x: 1, y: 2, width: 32, height: 16 })
        );
    }

    #[test]
    fn plot_other_keeps_tokens() {
        let ev = parse("PLOT LINE x0 0 y0 0 x1 9 y1 9").unwrap();
        match ev {
            Inbound::Plot(PlotCmd::Other { tag, args }) => {
                assert_eq!(tag, "LINE");
                assert_eq!(args, vec!["x0", "0", "y0", "0", "x1", "9", "y1", "9"]);
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn log_message_takes_rest_of_line() {
        let ev = parse("LOG source js foldable TRUE level WARN message undefined is not a function")
            .unwrap();
        assert_eq!(
            ev,
            Inbound::Log {
                win: None,
                record: LogRecord {
                    source: "js".into(),
                    foldable: true,
                    level: "WARN".into(),
                    message: "undefined is not a function".into(),
                },
            }
        );
    }

    #[test]
    fn log_honours_window_scope() {
        let ev = parse("LOG win win3 source console foldable FALSE level INFO message hi").unwrap();
        match ev {
            Inbound::Log { win, record } => {
                assert_eq!(win.as_deref(), Some("win3"));
                assert_eq!(record.message, "hi");
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn login_ready_parses() {
        let ev = parse("LOGIN READY lw0 url http://a/ realm R username alice").unwrap();
        assert_eq!(
            ev,
            Inbound::LoginReady {
                id: "lw0".into(),
                url: "http://a/".into(),
                realm: "R".into(),
                username: "alice".into(),
            }
        );
    }

    #[test]
    fn page_info_state_parses() {
        let ev = parse("PAGE_INFO_STATE win0 state INTERNAL").unwrap();
        assert_eq!(
            ev,
            Inbound::PageInfoState { id: "win0".into(), state: "INTERNAL".into() }
        );
    }

    #[test]
    fn encoders_format_expected_lines() {
        assert_eq!(cmd::window_new(None), "WINDOW NEW");
        assert_eq!(cmd::window_new(Some("file:///t")), "WINDOW NEW file:///t");
        assert_eq!(cmd::window_go("w", "u", Some("r")), "WINDOW GO w u r");
        assert_eq!(
            cmd::window_redraw("w", Some([0, 0, 10, 10])),
            "WINDOW REDRAW w 0 0 10 10"
        );
        assert_eq!(
            cmd::window_click("w", 3, 4, MouseButton::Left, ClickKind::Single),
            "WINDOW CLICK w x 3 y 4 button LEFT kind SINGLE"
        );
        assert_eq!(cmd::options(&["--a=1".into(), "--b=2".into()]), "OPTIONS --a=1 --b=2");
    }
}

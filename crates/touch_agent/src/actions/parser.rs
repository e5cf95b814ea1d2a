//! Parser for the action DSL emitted by the model

use std::fmt;

use crate::error::ActionParseError;

/// Largest coordinate on either axis of the model's grid
pub const GRID_MAX: u16 = 999;

/// Longest `Wait` honoured, in seconds
pub const MAX_WAIT_SECONDS: f64 = 30.0;

/// A point on the model's normalized 0-999 grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridPoint {
    pub x: u16,
    pub y: u16,
}

impl GridPoint {
    pub fn new(x: u16, y: u16) -> Result<Self, ActionParseError> {
        if x > GRID_MAX || y > GRID_MAX {
            return Err(ActionParseError::InvalidCoordinate(format!("[{}, {}]", x, y)));
        }
        Ok(Self { x, y })
    }

    /// Map onto a screen of the given pixel size
    pub fn to_pixels(self, screen_width: u32, screen_height: u32) -> (i32, i32) {
        let x = (f64::from(self.x) / 1000.0 * f64::from(screen_width)) as i32;
        let y = (f64::from(self.y) / 1000.0 * f64::from(screen_height)) as i32;
        (x, y)
    }
}

impl fmt::Display for GridPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{}]", self.x, self.y)
    }
}

/// One action requested by the model
#[derive(Debug, Clone, PartialEq)]
pub enum ActionCommand {
    Launch { app: String },
    Tap { element: GridPoint },
    Swipe { start: GridPoint, end: GridPoint },
    Type { text: String },
    LongPress { element: GridPoint },
    DoubleTap { element: GridPoint },
    Back,
    Home,
    Wait { seconds: f64 },
    Finish { message: String },
}

impl ActionCommand {
    /// DSL name of the action
    pub fn name(&self) -> &'static str {
        match self {
            Self::Launch { .. } => "Launch",
            Self::Tap { .. } => "Tap",
            Self::Swipe { .. } => "Swipe",
            Self::Type { .. } => "Type",
            Self::LongPress { .. } => "Long Press",
            Self::DoubleTap { .. } => "Double Tap",
            Self::Back => "Back",
            Self::Home => "Home",
            Self::Wait { .. } => "Wait",
            Self::Finish { .. } => "finish",
        }
    }

    pub fn is_finish(&self) -> bool {
        matches!(self, Self::Finish { .. })
    }
}

impl fmt::Display for ActionCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Launch { app } => write!(f, "Launch {}", app),
            Self::Tap { element } | Self::LongPress { element } | Self::DoubleTap { element } => {
                write!(f, "{} {}", self.name(), element)
            }
            Self::Swipe { start, end } => write!(f, "Swipe {} -> {}", start, end),
            Self::Type { text } => write!(f, "Type {:?}", text),
            Self::Back | Self::Home => f.write_str(self.name()),
            Self::Wait { seconds } => write!(f, "Wait {}s", seconds),
            Self::Finish { message } => write!(f, "finish: {}", message),
        }
    }
}

/// Parse the `{action}` part of an `<answer>` block
pub fn parse_action(response: &str) -> Result<ActionCommand, ActionParseError> {
    let response = response.trim();

    // Type text may contain quotes and commas; take everything up to the last `")`
    if response.starts_with("do(action=\"Type\"") || response.starts_with("do(action=\"Type_Name\"")
    {
        if let Some(text_start) = response.find("text=\"") {
            let text_part = &response[text_start + 6..];
            if let Some(end_pos) = text_part.rfind("\")") {
                return Ok(ActionCommand::Type {
                    text: text_part[..end_pos].to_string(),
                });
            }
        }
    }

    if response.starts_with("do(") {
        return DoCall::parse(response)?.into_command();
    }

    if let Some(rest) = response.strip_prefix("finish(") {
        let message = rest.trim_start_matches("message=");
        let message = message
            .strip_suffix(')')
            .unwrap_or(message)
            .trim()
            .trim_start_matches('"')
            .trim_end_matches('"')
            .to_string();
        return Ok(ActionCommand::Finish { message });
    }

    Err(ActionParseError::Unrecognized(response.to_string()))
}

/// Right-hand side of one `key=value` argument
#[derive(Debug, Clone, PartialEq)]
enum Arg {
    Quoted(String),
    List(Vec<String>),
    Bare(String),
}

/// The arguments of a `do(...)` call, in the order written
#[derive(Debug, Default)]
struct DoCall {
    args: Vec<(String, Arg)>,
}

impl DoCall {
    fn parse(response: &str) -> Result<Self, ActionParseError> {
        let malformed = || ActionParseError::Unrecognized(response.to_string());
        let inner = response
            .strip_prefix("do(")
            .and_then(|s| s.strip_suffix(')'))
            .ok_or_else(malformed)?;

        let mut cursor = ArgCursor { rest: inner };
        let mut call = DoCall::default();
        while let Some(key) = cursor.key() {
            let key = key.ok_or_else(malformed)?;
            let value = cursor.value().ok_or_else(malformed)?;
            call.args.push((key.to_string(), value));
        }
        Ok(call)
    }

    fn get(&self, name: &str) -> Option<&Arg> {
        self.args.iter().find(|(key, _)| key == name).map(|(_, arg)| arg)
    }

    fn require(&self, action: &str, name: &'static str) -> Result<&Arg, ActionParseError> {
        self.get(name).ok_or_else(|| ActionParseError::MissingField {
            action: action.to_string(),
            field: name,
        })
    }

    fn action(&self) -> Result<&str, ActionParseError> {
        match self.get("action") {
            Some(Arg::Quoted(name)) | Some(Arg::Bare(name)) => Ok(name),
            _ => Err(ActionParseError::MissingField {
                action: "do".to_string(),
                field: "action",
            }),
        }
    }

    fn text(&self, action: &str, name: &'static str) -> Result<String, ActionParseError> {
        Ok(match self.require(action, name)? {
            Arg::Quoted(text) | Arg::Bare(text) => text.clone(),
            Arg::List(items) => items.join(", "),
        })
    }

    fn point(&self, action: &str, name: &'static str) -> Result<GridPoint, ActionParseError> {
        match self.require(action, name)? {
            Arg::List(items) if items.len() == 2 => {
                GridPoint::new(grid_axis(&items[0])?, grid_axis(&items[1])?)
            }
            Arg::List(items) => Err(ActionParseError::InvalidCoordinate(items.join(","))),
            Arg::Quoted(raw) | Arg::Bare(raw) => Err(ActionParseError::InvalidCoordinate(raw.clone())),
        }
    }

    /// `Wait` length in seconds; absent or unreadable values wait one second
    fn seconds(&self) -> f64 {
        let seconds: f64 = match self.get("duration") {
            Some(Arg::Quoted(raw)) | Some(Arg::Bare(raw)) => raw
                .trim()
                .trim_end_matches("seconds")
                .trim_end_matches("second")
                .trim_end_matches('s')
                .trim()
                .parse()
                .unwrap_or(1.0),
            _ => 1.0,
        };
        seconds.clamp(0.0, MAX_WAIT_SECONDS)
    }

    fn into_command(self) -> Result<ActionCommand, ActionParseError> {
        let action = self.action()?;
        let command = match action {
            "Launch" => ActionCommand::Launch {
                app: self.text(action, "app")?,
            },
            "Tap" => ActionCommand::Tap {
                element: self.point(action, "element")?,
            },
            "Swipe" => ActionCommand::Swipe {
                start: self.point(action, "start")?,
                end: self.point(action, "end")?,
            },
            "Type" | "Type_Name" => ActionCommand::Type {
                text: self.text(action, "text")?,
            },
            "Long Press" => ActionCommand::LongPress {
                element: self.point(action, "element")?,
            },
            "Double Tap" => ActionCommand::DoubleTap {
                element: self.point(action, "element")?,
            },
            "Back" => ActionCommand::Back,
            "Home" => ActionCommand::Home,
            "Wait" => ActionCommand::Wait {
                seconds: self.seconds(),
            },
            other => return Err(ActionParseError::UnknownAction(other.to_string())),
        };
        Ok(command)
    }
}

/// One grid axis; fractional values round to the nearest cell
fn grid_axis(raw: &str) -> Result<u16, ActionParseError> {
    raw.parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .map(f64::round)
        .filter(|n| (0.0..=f64::from(u16::MAX)).contains(n))
        .map(|n| n as u16)
        .ok_or_else(|| ActionParseError::InvalidCoordinate(raw.to_string()))
}

/// Walks `key=value, key=value` text left to right
struct ArgCursor<'a> {
    rest: &'a str,
}

impl<'a> ArgCursor<'a> {
    /// Next key; `None` at the end, `Some(None)` if text remains without a `=`
    fn key(&mut self) -> Option<Option<&'a str>> {
        self.rest = self
            .rest
            .trim_start_matches(|c: char| c == ',' || c.is_whitespace());
        if self.rest.is_empty() {
            return None;
        }
        let Some(eq) = self.rest.find('=') else {
            return Some(None);
        };
        let key = self.rest[..eq].trim();
        self.rest = self.rest[eq + 1..].trim_start();
        Some(Some(key).filter(|k| !k.is_empty()))
    }

    fn value(&mut self) -> Option<Arg> {
        match self.rest.chars().next()? {
            '"' => self.quoted().map(Arg::Quoted),
            '[' => self.list().map(Arg::List),
            _ => Some(Arg::Bare(self.bare())),
        }
    }

    fn quoted(&mut self) -> Option<String> {
        let mut out = String::new();
        let mut chars = self.rest.char_indices().skip(1);
        while let Some((i, ch)) = chars.next() {
            match ch {
                '"' => {
                    self.rest = &self.rest[i + 1..];
                    return Some(out);
                }
                '\\' => match chars.next()?.1 {
                    'n' => out.push('\n'),
                    escaped @ ('"' | '\\') => out.push(escaped),
                    other => {
                        out.push('\\');
                        out.push(other);
                    }
                },
                _ => out.push(ch),
            }
        }
        None
    }

    fn list(&mut self) -> Option<Vec<String>> {
        let end = self.rest.find(']')?;
        let items = self.rest[1..end]
            .split(',')
            .map(|item| item.trim().trim_matches('"').to_string())
            .filter(|item| !item.is_empty())
            .collect();
        self.rest = &self.rest[end + 1..];
        Some(items)
    }

    fn bare(&mut self) -> String {
        let end = self.rest.find(',').unwrap_or(self.rest.len());
        let value = self.rest[..end].trim().to_string();
        self.rest = &self.rest[end..];
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tap() {
        let cmd = parse_action("do(action=\"Tap\", element=[500, 300])").unwrap();
        assert_eq!(
            cmd,
            ActionCommand::Tap {
                element: GridPoint { x: 500, y: 300 }
            }
        );
    }

    #[test]
    fn test_parse_type_keeps_quotes_and_commas() {
        let cmd = parse_action("do(action=\"Type\", text=\"Hello, \"World\"\")").unwrap();
        assert_eq!(
            cmd,
            ActionCommand::Type {
                text: "Hello, \"World\"".to_string()
            }
        );
    }

    #[test]
    fn test_parse_swipe_and_presses() {
        assert_eq!(
            parse_action("do(action=\"Swipe\", start=[100, 800], end=[100, 200])").unwrap(),
            ActionCommand::Swipe {
                start: GridPoint { x: 100, y: 800 },
                end: GridPoint { x: 100, y: 200 },
            }
        );
        assert!(matches!(
            parse_action("do(action=\"Long Press\", element=[1,2])").unwrap(),
            ActionCommand::LongPress { .. }
        ));
        assert!(matches!(
            parse_action("do(action=\"Double Tap\", element=[1,2])").unwrap(),
            ActionCommand::DoubleTap { .. }
        ));
    }

    #[test]
    fn test_parse_navigation_launch_and_wait() {
        assert_eq!(parse_action("do(action=\"Back\")").unwrap(), ActionCommand::Back);
        assert_eq!(parse_action("do(action=\"Home\")").unwrap(), ActionCommand::Home);
        assert_eq!(
            parse_action("do(action=\"Launch\", app=\"Settings\")").unwrap(),
            ActionCommand::Launch {
                app: "Settings".to_string()
            }
        );
        assert_eq!(
            parse_action("do(action=\"Wait\", duration=\"2s\")").unwrap(),
            ActionCommand::Wait { seconds: 2.0 }
        );
        assert_eq!(
            parse_action("do(action=\"Wait\", duration=\"3 seconds\")").unwrap(),
            ActionCommand::Wait { seconds: 3.0 }
        );
        assert_eq!(
            parse_action("do(action=\"Wait\", duration=\"600s\")").unwrap(),
            ActionCommand::Wait {
                seconds: MAX_WAIT_SECONDS
            }
        );
    }

    #[test]
    fn test_parse_argument_forms() {
        assert_eq!(
            parse_action("do(action=\"Launch\", app=\"Google \\\"Maps\\\"\")").unwrap(),
            ActionCommand::Launch {
                app: "Google \"Maps\"".to_string()
            }
        );
        assert_eq!(
            parse_action("do(action=\"Tap\", element=[499.6, \"300\"])").unwrap(),
            ActionCommand::Tap {
                element: GridPoint { x: 500, y: 300 }
            }
        );
        assert_eq!(
            parse_action("do(action=Wait, duration=4)").unwrap(),
            ActionCommand::Wait { seconds: 4.0 }
        );
        assert_eq!(
            parse_action("do(action=\"Wait\")").unwrap(),
            ActionCommand::Wait { seconds: 1.0 }
        );
    }

    #[test]
    fn test_parse_finish() {
        assert_eq!(
            parse_action("finish(message=\"done\")").unwrap(),
            ActionCommand::Finish {
                message: "done".to_string()
            }
        );
        assert_eq!(
            parse_action("finish(message=\"sent (2 files)\")").unwrap(),
            ActionCommand::Finish {
                message: "sent (2 files)".to_string()
            }
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            parse_action("tap the button"),
            Err(ActionParseError::Unrecognized(_))
        ));
        assert!(matches!(
            parse_action("do(action=\"Fly\")"),
            Err(ActionParseError::UnknownAction(_))
        ));
        assert!(matches!(
            parse_action("do(action=\"Tap\")"),
            Err(ActionParseError::MissingField { field: "element", .. })
        ));
        assert!(matches!(
            parse_action("do(action=\"Tap\", element=[1000, 5])"),
            Err(ActionParseError::InvalidCoordinate(_))
        ));
        assert!(matches!(
            parse_action("do(action=\"Tap\", element=[-1, 5])"),
            Err(ActionParseError::InvalidCoordinate(_))
        ));
        assert!(matches!(
            parse_action("do(action=\"Tap\", element=\"center\")"),
            Err(ActionParseError::InvalidCoordinate(_))
        ));
        assert!(matches!(
            parse_action("do(action=\"Back\", now)"),
            Err(ActionParseError::Unrecognized(_))
        ));
        assert!(matches!(
            parse_action("do(action=\"Launch\", app=\"Maps)"),
            Err(ActionParseError::Unrecognized(_))
        ));
    }

    #[test]
    fn test_grid_to_pixels() {
        let p = GridPoint::new(500, 250).unwrap();
        assert_eq!(p.to_pixels(1080, 2400), (540, 600));
        assert_eq!(GridPoint::new(0, 0).unwrap().to_pixels(1080, 2400), (0, 0));
        assert_eq!(
            GridPoint::new(999, 999).unwrap().to_pixels(1080, 2400),
            (1078, 2397)
        );
    }
}

use std::io::{Result, Write, stdin, stdout};

pub struct Confirm {
    /// The message to display before the prompt text.
    message: String,
    /// The default value for confirmation.
    default: bool,
}

impl Confirm {
    pub fn new<S: Into<String>>(message: S, default: bool) -> Self {
        Self {
            message: message.into(),
            default,
        }
    }

    pub fn confirm(&self) -> Result<bool> {
        let mut stdout = stdout();
        write!(stdout, "{}", self.message)?;
        write!(stdout, " ")?;
        if self.default {
            write!(stdout, "[Y]/n")?;
        } else {
            write!(stdout, "y/[N]")?;
        }
        write!(stdout, " ")?;
        stdout.flush()?;

        let mut input = String::new();
        stdin().read_line(&mut input)?;

        Ok(match input.trim() {
            "y" | "Y" => true,
            "n" | "N" => false,
            "" => self.default,
            _ => false,
        })
    }
}

/// A single-keystroke multiple choice prompt.
///
/// Each option is shown as `[k]label`; the answer is matched on the key
/// character, with the first option as default on empty input.
pub struct Choice {
    message: String,
    options: &'static [(char, &'static str)],
}

impl Choice {
    pub fn new<S: Into<String>>(message: S, options: &'static [(char, &'static str)]) -> Self {
        Self {
            message: message.into(),
            options,
        }
    }

    pub fn ask(&self) -> Result<char> {
        let mut stdout = stdout();
        write!(stdout, "{} ", self.message)?;
        for (i, (key, label)) in self.options.iter().enumerate() {
            if i > 0 {
                write!(stdout, ", ")?;
            }
            write!(stdout, "[{key}]{label}")?;
        }
        write!(stdout, " ")?;
        stdout.flush()?;

        let mut input = String::new();
        stdin().read_line(&mut input)?;
        let answer = input.trim().chars().next();

        Ok(match answer {
            Some(c) if self.options.iter().any(|(key, _)| *key == c) => c,
            _ => self.options[0].0,
        })
    }
}

//! Line-oriented user interaction.
use std::io::{self, BufRead, Write};

use crossterm::{
    cursor::MoveTo,
    queue,
    terminal::{Clear, ClearType},
};

/// Request/response channel to the user.
pub trait Prompter {
    /// Shows a line of output.
    fn say(&mut self, text: &str) -> io::Result<()>;

    /// Shows `prompt` and reads one line. `None` means end of input.
    fn ask(&mut self, prompt: &str) -> io::Result<Option<String>>;

    /// Whether a human is on the other end.
    fn is_interactive(&self) -> bool;

    /// Clears the screen before a menu is drawn. A no-op unless interactive.
    fn clear(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// [`Prompter`] over any reader/writer pair.
pub struct LinePrompter<R, W> {
    input: R,
    output: W,
    interactive: bool,
}

impl<R: BufRead, W: Write> LinePrompter<R, W> {
    /// Creates a prompter; `interactive` enables screen clearing and pauses.
    pub fn new(input: R, output: W, interactive: bool) -> Self {
        Self {
            input,
            output,
            interactive,
        }
    }

    /// Consumes the prompter and returns the output writer.
    pub fn into_output(self) -> W {
        self.output
    }
}

impl<R: BufRead, W: Write> Prompter for LinePrompter<R, W> {
    fn say(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.output, "{text}")?;
        self.output.flush()
    }

    fn ask(&mut self, prompt: &str) -> io::Result<Option<String>> {
        write!(self.output, "{prompt}")?;
        self.output.flush()?;

        let mut line = String::new();
        match self.input.read_line(&mut line)? {
            0 => {
                // Keep the next output off the prompt line.
                writeln!(self.output)?;
                Ok(None)
            }
            _ => Ok(Some(line.trim().to_string())),
        }
    }

    fn is_interactive(&self) -> bool {
        self.interactive
    }

    fn clear(&mut self) -> io::Result<()> {
        if self.interactive {
            queue!(self.output, Clear(ClearType::All), MoveTo(0, 0))?;
            self.output.flush()?;
        }
        Ok(())
    }
}

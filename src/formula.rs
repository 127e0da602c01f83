//! LaTeX formula rendering for the HTML page.
//!
//! Rendering is best effort: anything that cannot be rendered is shown as the
//! original `$...$` source.

use std::cell::Cell;
use std::io::{ErrorKind, Read, Write};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use html_escape::encode_text;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::{debug, info, warn};

pub trait FormulaRenderer {
    /// Rendered markup for `formula`, or `None` to fall back to the source.
    fn render(&self, formula: &str, display: bool) -> Option<String>;
}

/// Leaves every formula as source text.
pub struct Passthrough;

impl FormulaRenderer for Passthrough {
    fn render(&self, _formula: &str, _display: bool) -> Option<String> {
        None
    }
}

/// Renders through the `katex` command line tool.
pub struct KatexCli {
    program: String,
    timeout: Duration,
    available: Cell<bool>,
}

impl KatexCli {
    pub fn new(timeout: Duration) -> Self {
        Self::with_program("katex", timeout)
    }

    pub fn with_program(program: impl Into<String>, timeout: Duration) -> Self {
        Self { program: program.into(), timeout, available: Cell::new(true) }
    }

    fn run(&self, formula: &str, display: bool) -> std::io::Result<Option<String>> {
        let mut cmd = Command::new(&self.program);
        if display {
            cmd.arg("--display-mode");
        }
        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(formula.trim().as_bytes())?;
        }
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                warn!(formula, "KaTeX timed out");
                return Ok(None);
            }
            thread::sleep(Duration::from_millis(10));
        };

        let out = stdout.join().unwrap_or_default();
        if !status.success() {
            let err = stderr.join().unwrap_or_default();
            warn!(formula, error = %err.trim(), "KaTeX failed to render formula");
            return Ok(None);
        }

        let rendered = out.trim();
        if rendered.contains("<span") || rendered.contains("<div") {
            Ok(Some(rendered.to_string()))
        } else {
            warn!(formula, "unexpected KaTeX output");
            Ok(None)
        }
    }
}

/// Read a child pipe to the end on its own thread so a full pipe never
/// blocks the child.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut out = String::new();
        if let Some(mut p) = pipe {
            let _ = p.read_to_string(&mut out);
        }
        out
    })
}

impl FormulaRenderer for KatexCli {
    fn render(&self, formula: &str, display: bool) -> Option<String> {
        if !self.available.get() || formula.trim().is_empty() {
            return None;
        }
        match self.run(&preprocess_formula(formula), display) {
            Ok(out) => out,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(program = %self.program, "KaTeX CLI not found, formulas will not be rendered");
                self.available.set(false);
                None
            }
            Err(e) => {
                warn!(formula, error = %e, "KaTeX invocation failed");
                None
            }
        }
    }
}

static RE_UNICODE_DASH: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\unicode\{x201[34]\}").unwrap());
static RE_UNICODE_ANY: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\unicode\{[^}]+\}").unwrap());
static RE_CROSS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\[Cc]ross\b").unwrap());
static RE_VECTOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\vector\{([^}]+)\}").unwrap());
static RE_MBOX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\mbox\{([^}]*)\}").unwrap());

/// Rewrite commands KaTeX does not know into ones it does.
pub fn preprocess_formula(formula: &str) -> String {
    let s = RE_UNICODE_DASH.replace_all(formula, "-");
    let s = RE_UNICODE_ANY.replace_all(&s, "");
    let s = RE_CROSS.replace_all(&s, r"\times");
    let s = RE_VECTOR.replace_all(&s, r"\vec{$1}");
    let s = RE_MBOX.replace_all(&s, r"\text{$1}");
    s.into_owned()
}

static RE_DISPLAY_MATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\$([^$]+?)\$\$").unwrap());
static RE_INLINE_MATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$([^$\n]+?)\$").unwrap());
static RE_PRICE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\d.,\s]+$").unwrap());
static RE_PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x00KATEX(\d+)\x00").unwrap());

// render_text strips NUL from its input, so these cannot collide with text
fn placeholder(index: usize) -> String {
    format!("\u{0}KATEX{index}\u{0}")
}

/// Options for [`render_text`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MathOptions {
    /// Leave short numeric `$...$` spans (prices like `$99.99$`) unrendered.
    pub skip_numeric_prices: bool,
}

/// Turn plain text with `$...$` / `$$...$$` formulas into HTML: formulas go
/// through `renderer`, everything else is HTML-escaped.
pub fn render_text(text: &str, renderer: &dyn FormulaRenderer, opts: MathOptions) -> String {
    if text.is_empty() {
        return String::new();
    }
    let text = text.replace('\u{0}', "");
    let mut pieces: Vec<String> = Vec::new();

    let with_display = RE_DISPLAY_MATH.replace_all(&text, |caps: &Captures<'_>| {
        let formula = &caps[1];
        let html = match renderer.render(formula, true) {
            Some(r) => r,
            None => encode_text(&format!("$${formula}$$")).into_owned(),
        };
        pieces.push(format!(r#"<div class="katex-display">{html}</div>"#));
        placeholder(pieces.len() - 1)
    });

    let with_inline = RE_INLINE_MATH.replace_all(&with_display, |caps: &Captures<'_>| {
        let formula = &caps[1];
        let skip = opts.skip_numeric_prices
            && formula.trim().len() <= 10
            && RE_PRICE.is_match(formula.trim());
        let rendered = if skip { None } else { renderer.render(formula, false) };
        let html = match rendered {
            Some(r) => format!(r#"<span class="katex-inline">{r}</span>"#),
            None => encode_text(&format!("${formula}$")).into_owned(),
        };
        pieces.push(html);
        placeholder(pieces.len() - 1)
    });

    if !pieces.is_empty() {
        debug!(formulas = pieces.len(), "processed formulas");
    }

    let escaped = encode_text(&with_inline);
    RE_PLACEHOLDER
        .replace_all(&escaped, |caps: &Captures<'_>| {
            caps[1]
                .parse::<usize>()
                .ok()
                .and_then(|i| pieces.get(i).cloned())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

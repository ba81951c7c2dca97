use std::io::IsTerminal;
use std::time::{Duration, Instant};

use anstyle::{AnsiColor, Effects, Style};
use indicatif::{HumanDuration, ProgressBar, ProgressStyle};

const FETCH_TEMPLATE: &str = "{spinner:.cyan} fetching {bar:24.cyan/blue} {pos}/{len} {wide_msg}";

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OutputStyle {
    Plain,
    Rich,
}

/// `--plain` and `NO_COLOR` always win; otherwise decoration follows stdout.
pub(crate) fn resolve_output_style(
    force_plain: bool,
    no_color: bool,
    stdout_is_tty: bool,
) -> OutputStyle {
    if force_plain || no_color || !stdout_is_tty {
        OutputStyle::Plain
    } else {
        OutputStyle::Rich
    }
}

pub(crate) fn current_output_style(force_plain: bool) -> OutputStyle {
    resolve_output_style(
        force_plain,
        std::env::var_os("NO_COLOR").is_some(),
        std::io::stdout().is_terminal(),
    )
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum Status {
    Step,
    Ok,
    Skip,
}

impl Status {
    fn badge(self) -> &'static str {
        match self {
            Self::Step => "..",
            Self::Ok => "OK",
            Self::Skip => "SKIP",
        }
    }
}

/// Line-oriented installer output on stdout.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Ui {
    style: OutputStyle,
}

impl Ui {
    pub(crate) fn new(style: OutputStyle) -> Self {
        Self { style }
    }

    pub(crate) fn status(self, status: Status, message: &str) {
        println!("{}", render_status_line(self.style, status, message));
    }

    pub(crate) fn section(self, title: &str) {
        if let Some(header) = render_section_header(self.style, title) {
            println!();
            println!("{header}");
        }
    }

    pub(crate) fn lines(self, lines: &[String]) {
        for line in lines {
            println!("{line}");
        }
    }

    pub(crate) fn fetch_progress(self, expected: u64) -> FetchProgress {
        let bar = (self.style == OutputStyle::Rich).then(|| {
            let bar = ProgressBar::new(expected.max(1));
            if let Ok(template) = ProgressStyle::with_template(FETCH_TEMPLATE) {
                bar.set_style(template.progress_chars("#>-"));
            }
            bar.enable_steady_tick(Duration::from_millis(100));
            bar
        });
        FetchProgress {
            style: self.style,
            bar,
            done: 0,
            total: expected,
            started: Instant::now(),
        }
    }
}

/// Tracks the fetch step; archive fetches report three phases, per-file
/// fetches one tick per manifest entry.
pub(crate) struct FetchProgress {
    style: OutputStyle,
    bar: Option<ProgressBar>,
    done: u64,
    total: u64,
    started: Instant,
}

impl FetchProgress {
    pub(crate) fn update(&mut self, done: u64, total: u64) {
        self.total = total;
        self.done = done.min(total);
        if let Some(bar) = &self.bar {
            bar.set_length(total.max(1));
            bar.set_position(self.done);
        }
    }

    pub(crate) fn finish(mut self, succeeded: bool) {
        let Some(bar) = self.bar.take() else {
            return;
        };
        bar.finish_and_clear();
        if !succeeded {
            return;
        }
        if let Some(line) =
            render_fetch_done_line(self.style, self.done, self.total, self.started.elapsed())
        {
            println!("{line}");
        }
    }
}

pub(crate) fn render_status_line(style: OutputStyle, status: Status, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => format!("[{}] {message}", status.badge()),
    }
}

fn render_section_header(style: OutputStyle, title: &str) -> Option<String> {
    match style {
        OutputStyle::Plain => None,
        OutputStyle::Rich => Some(paint(header_style(), &format!("== {title} =="))),
    }
}

/// The line left behind once the fetch bar is cleared; plain output has none.
pub(crate) fn render_fetch_done_line(
    style: OutputStyle,
    done: u64,
    total: u64,
    elapsed: Duration,
) -> Option<String> {
    match style {
        OutputStyle::Plain => None,
        OutputStyle::Rich => Some(format!(
            "{} {done}/{total} steps in {}",
            paint(header_style(), "fetch done"),
            HumanDuration(elapsed)
        )),
    }
}

fn header_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::Cyan.into()))
        .effects(Effects::BOLD)
}

fn paint(style: Style, text: &str) -> String {
    format!("{}{text}{}", style.render(), style.render_reset())
}

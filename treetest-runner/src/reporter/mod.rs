// Copyright (c) The treetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Prints out and aggregates test execution statuses.
//!
//! The reporter owns the [`RunTree`]s exclusively; the supervisor pushes
//! events into it through [`TestReporter::report_event`] and nothing else
//! touches the model. Invocation-level events update a silent aggregate
//! tree; module-level events feed the user-visible tree and the terminal.

mod tree;

pub use tree::*;

use crate::{
    errors::WriteEventError,
    harness::{ChannelKind, EventSource, HarnessEvent},
};
use owo_colors::{OwoColorize, Style};
use std::io::Write;
use tracing::warn;

/// Renders the run incrementally and owns the result model.
#[derive(Debug, Default)]
pub struct TestReporter {
    visible: RunTree,
    aggregate: RunTree,
    styles: Box<Styles>,
}

impl TestReporter {
    /// Creates a reporter with colorless output.
    pub fn new() -> Self {
        Self::default()
    }

    /// Colorizes output.
    pub fn colorize(&mut self) {
        self.styles.colorize();
    }

    /// Applies one event and renders whatever it completed.
    pub fn report_event(
        &mut self,
        source: EventSource,
        event: HarnessEvent,
        mut writer: impl Write,
    ) -> Result<(), WriteEventError> {
        let applied = match source.kind {
            ChannelKind::Invocation => {
                // The aggregate tree is displayed silently; warnings still
                // reach the log.
                let applied = self.aggregate.apply(source.conn_id, event);
                for item in &applied {
                    if let Applied::Warning(message) = item {
                        warn!("protocol warning (invocation channel): {message}");
                    }
                }
                return Ok(());
            }
            ChannelKind::Module => self.visible.apply(source.conn_id, event),
        };

        for item in applied {
            match item {
                Applied::None => {}
                Applied::CaseEnded(case) => self.write_case(&case, &mut writer)?,
                Applied::ModuleEnded(summary) => self.write_module_summary(&summary, &mut writer)?,
                Applied::Warning(message) => warn!("protocol warning: {message}"),
            }
        }
        Ok(())
    }

    /// Closes the model at stream end, prints the run summary and returns the
    /// final counters.
    pub fn finalize(&mut self, mut writer: impl Write) -> Result<RunStats, WriteEventError> {
        self.visible.finalize();
        self.aggregate.finalize();

        // A harness that only ever opened the invocation channel still ran
        // tests; fall back to the aggregate in that case.
        let stats = if self.visible.is_empty() {
            self.aggregate.stats()
        } else {
            self.visible.stats()
        };

        let summary_style = if stats.is_success() {
            self.styles.pass
        } else {
            self.styles.fail
        };
        write!(writer, "{:>12} ", "Summary".style(summary_style))?;
        write!(
            writer,
            "{} tests: {} passed",
            stats.started.style(self.styles.count),
            stats.passed.style(self.styles.pass),
        )?;
        if stats.failed > 0 {
            write!(writer, ", {} failed", stats.failed.style(self.styles.fail))?;
        }
        if stats.assumption_failed > 0 {
            write!(
                writer,
                ", {} assumption failed",
                stats.assumption_failed.style(self.styles.fail)
            )?;
        }
        if stats.ignored > 0 {
            write!(writer, ", {} ignored", stats.ignored.style(self.styles.skip))?;
        }
        if stats.incomplete > 0 {
            write!(
                writer,
                ", {} incomplete",
                stats.incomplete.style(self.styles.fail)
            )?;
        }
        writeln!(writer)?;

        if stats.incomplete_modules > 0 {
            writeln!(
                writer,
                "{:>12} {} module(s) never closed",
                "Warning".style(self.styles.fail),
                stats.incomplete_modules.style(self.styles.count),
            )?;
        }
        if stats.protocol_warnings > 0 {
            writeln!(
                writer,
                "{:>12} {} protocol warning(s), see the run log",
                "Warning".style(self.styles.skip),
                stats.protocol_warnings.style(self.styles.count),
            )?;
        }

        Ok(stats)
    }

    /// The user-visible tree, for inspection after the run.
    pub fn visible_tree(&self) -> &RunTree {
        &self.visible
    }

    fn write_case(&self, case: &CaseNode, mut writer: impl Write) -> Result<(), WriteEventError> {
        let style = match case.state {
            CaseState::Passed => self.styles.pass,
            CaseState::Failed => self.styles.fail,
            CaseState::Ignored | CaseState::AssumptionFailed => self.styles.skip,
            CaseState::Started | CaseState::Incomplete => self.styles.fail,
        };
        write!(writer, "{:>12} ", case.state.label().style(style))?;
        match case.duration_ms() {
            Some(ms) => write!(writer, "[{:>8.3}s] ", ms as f64 / 1000.0)?,
            None => write!(writer, "[        ] ")?,
        }
        write!(writer, "{}#{}", case.class_name, case.test_name)?;
        if !case.metrics.is_empty() {
            let rendered: Vec<String> = case
                .metrics
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            write!(writer, " ({})", rendered.join(", "))?;
        }
        writeln!(writer)?;

        if case.state == CaseState::Failed {
            if let Some(trace) = &case.trace {
                for line in trace.lines() {
                    writeln!(writer, "    {line}")?;
                }
            }
        }
        Ok(())
    }

    fn write_module_summary(
        &self,
        summary: &ModuleSummary,
        mut writer: impl Write,
    ) -> Result<(), WriteEventError> {
        let ok = summary.failed == 0 && summary.incomplete == 0;
        let style = if ok { self.styles.pass } else { self.styles.fail };
        write!(
            writer,
            "{:>12} {}: {} passed",
            "Module".style(style),
            summary.name,
            summary.passed.style(self.styles.count),
        )?;
        if summary.failed > 0 {
            write!(writer, ", {} failed", summary.failed.style(self.styles.fail))?;
        }
        if summary.assumption_failed > 0 {
            write!(
                writer,
                ", {} assumption failed",
                summary.assumption_failed.style(self.styles.skip)
            )?;
        }
        if summary.ignored > 0 {
            write!(
                writer,
                ", {} ignored",
                summary.ignored.style(self.styles.skip)
            )?;
        }
        if summary.incomplete > 0 {
            write!(
                writer,
                ", {} incomplete",
                summary.incomplete.style(self.styles.fail)
            )?;
        }
        if let Some(expected) = summary.expected {
            let completed = summary.passed
                + summary.failed
                + summary.ignored
                + summary.assumption_failed;
            if completed != expected {
                write!(
                    writer,
                    " ({completed}/{expected} expected)",
                )?;
            }
        }
        writeln!(writer)?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Styles {
    count: Style,
    pass: Style,
    fail: Style,
    skip: Style,
}

impl Styles {
    fn colorize(&mut self) {
        self.count = Style::new().bold();
        self.pass = Style::new().green().bold();
        self.fail = Style::new().red().bold();
        self.skip = Style::new().yellow().bold();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn module_source() -> EventSource {
        EventSource {
            conn_id: 1,
            kind: ChannelKind::Module,
        }
    }

    fn invocation_source() -> EventSource {
        EventSource {
            conn_id: 0,
            kind: ChannelKind::Invocation,
        }
    }

    fn feed(reporter: &mut TestReporter, source: EventSource, events: Vec<HarnessEvent>) {
        let mut sink = Vec::new();
        for event in events {
            reporter.report_event(source, event, &mut sink).unwrap();
        }
    }

    fn scenario_events() -> Vec<HarnessEvent> {
        vec![
            HarnessEvent::ModuleStarted {
                module_name: "m".to_owned(),
                context_file: None,
            },
            HarnessEvent::RunStarted { test_count: 2 },
            HarnessEvent::TestStarted {
                class_name: "C".to_owned(),
                test_name: "a".to_owned(),
                start_time: Some(0),
            },
            HarnessEvent::TestEnded {
                class_name: "C".to_owned(),
                test_name: "a".to_owned(),
                end_time: Some(10),
                metrics: BTreeMap::new(),
            },
            HarnessEvent::TestStarted {
                class_name: "C".to_owned(),
                test_name: "b".to_owned(),
                start_time: Some(11),
            },
            HarnessEvent::TestFailed {
                class_name: "C".to_owned(),
                test_name: "b".to_owned(),
                trace: "t".to_owned(),
            },
            HarnessEvent::TestEnded {
                class_name: "C".to_owned(),
                test_name: "b".to_owned(),
                end_time: Some(20),
                metrics: BTreeMap::new(),
            },
            HarnessEvent::RunEnded,
            HarnessEvent::ModuleEnded,
        ]
    }

    #[test]
    fn scenario_counts_one_pass_one_fail() {
        let mut reporter = TestReporter::new();
        feed(&mut reporter, module_source(), scenario_events());
        let stats = reporter.finalize(Vec::new()).unwrap();
        assert_eq!(stats.passed, 1);
        assert_eq!(stats.failed, 1);
        assert!(!stats.is_success());
    }

    #[test]
    fn invocation_channel_is_silent() {
        let mut reporter = TestReporter::new();
        let mut out = Vec::new();
        for event in scenario_events() {
            reporter
                .report_event(invocation_source(), event, &mut out)
                .unwrap();
        }
        assert!(out.is_empty(), "invocation events must not render");

        // With no module-level events, the aggregate decides the outcome.
        let stats = reporter.finalize(Vec::new()).unwrap();
        assert_eq!(stats.failed, 1);
    }

    #[test]
    fn case_lines_render_state_and_name() {
        let mut reporter = TestReporter::new();
        let mut out = Vec::new();
        for event in scenario_events() {
            reporter
                .report_event(module_source(), event, &mut out)
                .unwrap();
        }
        let rendered = String::from_utf8(out).unwrap();
        assert!(rendered.contains("PASS"), "{rendered}");
        assert!(rendered.contains("FAIL"), "{rendered}");
        assert!(rendered.contains("C#a"), "{rendered}");
        assert!(rendered.contains("Module m"), "{rendered}");
        assert!(rendered.contains("    t"), "failure trace indented: {rendered}");
    }

    #[test]
    fn all_passed_run_is_success() {
        let mut reporter = TestReporter::new();
        feed(
            &mut reporter,
            module_source(),
            vec![
                HarnessEvent::ModuleStarted {
                    module_name: "m".to_owned(),
                    context_file: None,
                },
                HarnessEvent::TestStarted {
                    class_name: "C".to_owned(),
                    test_name: "a".to_owned(),
                    start_time: Some(0),
                },
                HarnessEvent::TestEnded {
                    class_name: "C".to_owned(),
                    test_name: "a".to_owned(),
                    end_time: Some(5),
                    metrics: BTreeMap::new(),
                },
                HarnessEvent::ModuleEnded,
            ],
        );
        let stats = reporter.finalize(Vec::new()).unwrap();
        assert!(stats.is_success());
        assert_eq!(stats.passed, 1);
    }

    #[test]
    fn open_module_at_stream_end_fails_the_run() {
        let mut reporter = TestReporter::new();
        feed(
            &mut reporter,
            module_source(),
            vec![
                HarnessEvent::ModuleStarted {
                    module_name: "m".to_owned(),
                    context_file: None,
                },
                HarnessEvent::TestStarted {
                    class_name: "C".to_owned(),
                    test_name: "a".to_owned(),
                    start_time: Some(0),
                },
            ],
        );
        let stats = reporter.finalize(Vec::new()).unwrap();
        assert_eq!(stats.incomplete, 1);
        assert_eq!(stats.incomplete_modules, 1);
        assert!(!stats.is_success());
    }
}

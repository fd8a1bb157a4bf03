// Copyright (c) The treetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The in-memory run/module/case model.
//!
//! One [`RunTree`] per channel class. State is indexed by connection and by
//! `(class, test)` keys, so cross-connection interleaving is safe: each
//! module-level connection owns at most one open module at a time.

use crate::harness::HarnessEvent;
use std::collections::{BTreeMap, HashMap};

/// The lifecycle state of a test case.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CaseState {
    /// Started, no verdict yet.
    Started,
    /// Ended without a failure event.
    Passed,
    /// A failure event arrived.
    Failed,
    /// An ignore event arrived.
    Ignored,
    /// An assumption-failure event arrived.
    AssumptionFailed,
    /// The case never ended; its module closed or the stream stopped.
    Incomplete,
}

impl CaseState {
    /// The fixed-width label printed for this state.
    pub fn label(&self) -> &'static str {
        match self {
            CaseState::Started => "START",
            CaseState::Passed => "PASS",
            CaseState::Failed => "FAIL",
            CaseState::Ignored => "IGNORED",
            CaseState::AssumptionFailed => "ASSUMED",
            CaseState::Incomplete => "INCOMPLETE",
        }
    }
}

/// One test case node.
#[derive(Clone, Debug)]
pub struct CaseNode {
    /// The class name.
    pub class_name: String,
    /// The test name.
    pub test_name: String,
    /// Current state.
    pub state: CaseState,
    /// Harness-side start time, epoch milliseconds.
    pub start_time: Option<i64>,
    /// Harness-side end time, epoch milliseconds.
    pub end_time: Option<i64>,
    /// True once a TEST_ENDED has been consumed for this case.
    pub ended: bool,
    /// Failure or assumption trace.
    pub trace: Option<String>,
    /// Metrics attached at TEST_ENDED, if any.
    pub metrics: BTreeMap<String, String>,
}

impl CaseNode {
    fn key(&self) -> (String, String) {
        (self.class_name.clone(), self.test_name.clone())
    }

    /// Wall-clock duration, if the harness sent both timestamps.
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) if end >= start => Some(end - start),
            _ => None,
        }
    }
}

/// One module node.
#[derive(Clone, Debug)]
pub struct ModuleNode {
    /// The module name.
    pub name: String,
    /// The harness-side context file, if reported.
    pub context_file: Option<String>,
    /// Expected case count from TEST_RUN_STARTED.
    pub expected_count: Option<usize>,
    /// Cases in arrival order.
    pub cases: Vec<CaseNode>,
    /// True once TEST_MODULE_ENDED arrived.
    pub closed: bool,
    /// True for modules synthesized around a bare test run (a harness that
    /// never sends module events).
    pub implicit: bool,
    /// Log files associated with this module.
    pub logs: Vec<(String, String)>,
    index: HashMap<(String, String), usize>,
}

impl ModuleNode {
    fn new(name: String, context_file: Option<String>, implicit: bool) -> Self {
        Self {
            name,
            context_file,
            expected_count: None,
            cases: Vec::new(),
            closed: false,
            implicit,
            logs: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn find_case(&mut self, class_name: &str, test_name: &str) -> Option<&mut CaseNode> {
        let key = (class_name.to_owned(), test_name.to_owned());
        match self.index.get(&key) {
            Some(&i) => Some(&mut self.cases[i]),
            None => None,
        }
    }

    /// Per-module counters.
    pub fn summary(&self) -> ModuleSummary {
        let mut summary = ModuleSummary {
            name: self.name.clone(),
            expected: self.expected_count,
            ..ModuleSummary::default()
        };
        for case in &self.cases {
            match case.state {
                CaseState::Started => summary.incomplete += 1,
                CaseState::Passed => summary.passed += 1,
                CaseState::Failed => summary.failed += 1,
                CaseState::Ignored => summary.ignored += 1,
                CaseState::AssumptionFailed => summary.assumption_failed += 1,
                CaseState::Incomplete => summary.incomplete += 1,
            }
        }
        summary
    }
}

/// Counters for one module.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ModuleSummary {
    /// The module name.
    pub name: String,
    /// Expected case count, if announced.
    pub expected: Option<usize>,
    /// Passed cases.
    pub passed: usize,
    /// Failed cases.
    pub failed: usize,
    /// Ignored cases.
    pub ignored: usize,
    /// Assumption failures.
    pub assumption_failed: usize,
    /// Cases that never ended.
    pub incomplete: usize,
}

/// Counters for a whole run.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RunStats {
    /// Cases that started.
    pub started: usize,
    /// Passed cases.
    pub passed: usize,
    /// Failed cases.
    pub failed: usize,
    /// Ignored cases.
    pub ignored: usize,
    /// Assumption failures.
    pub assumption_failed: usize,
    /// Cases that never ended.
    pub incomplete: usize,
    /// Modules seen.
    pub modules: usize,
    /// Modules that never closed.
    pub incomplete_modules: usize,
    /// Protocol warnings counted.
    pub protocol_warnings: usize,
    /// Total events applied, warnings included.
    pub events: usize,
}

impl RunStats {
    /// True if every case passed or was ignored and every module closed.
    ///
    /// Protocol warnings never fail a run on their own, unless nothing else
    /// was decoded at all.
    pub fn is_success(&self) -> bool {
        let only_noise = self.protocol_warnings > 0 && self.events == self.protocol_warnings;
        self.failed == 0
            && self.assumption_failed == 0
            && self.incomplete == 0
            && self.incomplete_modules == 0
            && !only_noise
    }
}

/// The effect of applying one event, for the display layer.
#[derive(Clone, Debug)]
pub enum Applied {
    /// Nothing to display.
    None,
    /// A case reached a terminal state.
    CaseEnded(CaseNode),
    /// A module closed.
    ModuleEnded(ModuleSummary),
    /// A protocol warning was recorded.
    Warning(String),
}

/// The hierarchical result model for one channel class.
#[derive(Clone, Debug, Default)]
pub struct RunTree {
    modules: Vec<ModuleNode>,
    open_by_conn: HashMap<usize, usize>,
    protocol_warnings: usize,
    events: usize,
}

impl RunTree {
    /// An empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one event from the given connection.
    pub fn apply(&mut self, conn_id: usize, event: HarnessEvent) -> Vec<Applied> {
        self.events += 1;
        match event {
            HarnessEvent::ModuleStarted {
                module_name,
                context_file,
            } => {
                let mut applied = Vec::new();
                if let Some(open) = self.open_by_conn.remove(&conn_id) {
                    let previous = self.modules[open].name.clone();
                    applied.push(self.warn(format!(
                        "module `{module_name}` started while `{previous}` was open"
                    )));
                    applied.push(close_module(&mut self.modules[open]));
                }
                self.open_module(conn_id, ModuleNode::new(module_name, context_file, false));
                applied
            }
            HarnessEvent::RunStarted { test_count } => {
                let module = self.current_or_implicit(conn_id);
                module.expected_count = Some(test_count);
                Vec::new()
            }
            HarnessEvent::TestStarted {
                class_name,
                test_name,
                start_time,
            } => {
                let duplicate = {
                    let module = self.current_or_implicit(conn_id);
                    module
                        .find_case(&class_name, &test_name)
                        .is_some_and(|case| !case.ended)
                };
                if duplicate {
                    return vec![
                        self.warn(format!("double TEST_STARTED for {class_name}#{test_name}")),
                    ];
                }
                let module = self.current_or_implicit(conn_id);
                let case = CaseNode {
                    class_name,
                    test_name,
                    state: CaseState::Started,
                    start_time,
                    end_time: None,
                    ended: false,
                    trace: None,
                    metrics: BTreeMap::new(),
                };
                module.index.insert(case.key(), module.cases.len());
                module.cases.push(case);
                Vec::new()
            }
            HarnessEvent::TestFailed {
                class_name,
                test_name,
                trace,
            } => self.transition(conn_id, &class_name, &test_name, CaseState::Failed, Some(trace)),
            HarnessEvent::TestAssumptionFailure {
                class_name,
                test_name,
                trace,
            } => self.transition(
                conn_id,
                &class_name,
                &test_name,
                CaseState::AssumptionFailed,
                trace,
            ),
            HarnessEvent::TestIgnored {
                class_name,
                test_name,
            } => self.transition(conn_id, &class_name, &test_name, CaseState::Ignored, None),
            HarnessEvent::TestEnded {
                class_name,
                test_name,
                end_time,
                metrics,
            } => {
                enum End {
                    NoCase,
                    Double,
                    Ended(CaseNode),
                }
                let outcome = match self.open_by_conn.get(&conn_id).copied() {
                    None => End::NoCase,
                    Some(idx) => {
                        let module = &mut self.modules[idx];
                        match module.find_case(&class_name, &test_name) {
                            None => End::NoCase,
                            Some(case) if case.ended => End::Double,
                            Some(case) => {
                                case.ended = true;
                                case.end_time = end_time;
                                case.metrics = metrics;
                                if case.state == CaseState::Started {
                                    case.state = CaseState::Passed;
                                }
                                End::Ended(case.clone())
                            }
                        }
                    }
                };
                match outcome {
                    End::NoCase => vec![self.warn(format!(
                        "unmatched TEST_ENDED for {class_name}#{test_name}"
                    ))],
                    End::Double => vec![self.warn(format!(
                        "double TEST_ENDED for {class_name}#{test_name}"
                    ))],
                    End::Ended(case) => vec![Applied::CaseEnded(case)],
                }
            }
            HarnessEvent::RunEnded => {
                // An implicit module has no TEST_MODULE_ENDED coming; the
                // run-ended event is its close.
                if let Some(&open) = self.open_by_conn.get(&conn_id) {
                    if self.modules[open].implicit {
                        self.open_by_conn.remove(&conn_id);
                        return vec![close_module(&mut self.modules[open])];
                    }
                }
                Vec::new()
            }
            HarnessEvent::ModuleEnded => match self.open_by_conn.remove(&conn_id) {
                Some(open) => vec![close_module(&mut self.modules[open])],
                None => vec![self.warn("TEST_MODULE_ENDED with no open module".to_owned())],
            },
            HarnessEvent::LogAssociation {
                data_name,
                logged_file,
            } => {
                if let Some(module) = self.current_module(conn_id) {
                    module.logs.push((data_name, logged_file));
                }
                Vec::new()
            }
            HarnessEvent::ProtocolWarning { message } => vec![self.warn(message)],
        }
    }

    /// Marks everything still open as incomplete. Called at stream end.
    pub fn finalize(&mut self) {
        self.open_by_conn.clear();
        for module in &mut self.modules {
            if !module.closed {
                for case in &mut module.cases {
                    if !case.ended {
                        case.state = CaseState::Incomplete;
                    }
                }
            }
        }
    }

    /// Run-level counters.
    pub fn stats(&self) -> RunStats {
        let mut stats = RunStats {
            modules: self.modules.len(),
            protocol_warnings: self.protocol_warnings,
            events: self.events,
            ..RunStats::default()
        };
        for module in &self.modules {
            if !module.closed {
                stats.incomplete_modules += 1;
            }
            for case in &module.cases {
                stats.started += 1;
                match case.state {
                    CaseState::Started | CaseState::Incomplete => stats.incomplete += 1,
                    CaseState::Passed => stats.passed += 1,
                    CaseState::Failed => stats.failed += 1,
                    CaseState::Ignored => stats.ignored += 1,
                    CaseState::AssumptionFailed => stats.assumption_failed += 1,
                }
            }
        }
        stats
    }

    /// The modules seen so far, in arrival order.
    pub fn modules(&self) -> &[ModuleNode] {
        &self.modules
    }

    /// True if this tree never saw any event.
    pub fn is_empty(&self) -> bool {
        self.events == 0 && self.modules.is_empty()
    }

    fn warn(&mut self, message: String) -> Applied {
        self.protocol_warnings += 1;
        Applied::Warning(message)
    }

    fn open_module(&mut self, conn_id: usize, module: ModuleNode) -> &mut ModuleNode {
        self.modules.push(module);
        let idx = self.modules.len() - 1;
        self.open_by_conn.insert(conn_id, idx);
        &mut self.modules[idx]
    }

    fn current_module(&mut self, conn_id: usize) -> Option<&mut ModuleNode> {
        let idx = *self.open_by_conn.get(&conn_id)?;
        Some(&mut self.modules[idx])
    }

    fn current_or_implicit(&mut self, conn_id: usize) -> &mut ModuleNode {
        match self.open_by_conn.get(&conn_id) {
            Some(&idx) => &mut self.modules[idx],
            None => self.open_module(
                conn_id,
                ModuleNode::new("<run>".to_owned(), None, true),
            ),
        }
    }

    fn transition(
        &mut self,
        conn_id: usize,
        class_name: &str,
        test_name: &str,
        state: CaseState,
        trace: Option<String>,
    ) -> Vec<Applied> {
        enum Trans {
            NoCase,
            Double(CaseState),
            Done,
        }
        let outcome = match self.open_by_conn.get(&conn_id).copied() {
            None => Trans::NoCase,
            Some(idx) => {
                let module = &mut self.modules[idx];
                match module.find_case(class_name, test_name) {
                    None => Trans::NoCase,
                    Some(case) if case.state != CaseState::Started || case.ended => {
                        Trans::Double(case.state)
                    }
                    Some(case) => {
                        case.state = state;
                        if trace.is_some() {
                            case.trace = trace;
                        }
                        Trans::Done
                    }
                }
            }
        };
        match outcome {
            Trans::NoCase => vec![self.warn(format!(
                "{state:?} for unknown case {class_name}#{test_name}"
            ))],
            Trans::Double(previous) => vec![self.warn(format!(
                "double state transition for {class_name}#{test_name}: {previous:?} then {state:?}"
            ))],
            Trans::Done => Vec::new(),
        }
    }
}

// Closing is shared between the module-ended, run-ended (implicit) and
// started-while-open paths.
fn close_module(module: &mut ModuleNode) -> Applied {
    module.closed = true;
    for case in &mut module.cases {
        if !case.ended {
            case.state = CaseState::Incomplete;
        }
    }
    Applied::ModuleEnded(module.summary())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module_started(name: &str) -> HarnessEvent {
        HarnessEvent::ModuleStarted {
            module_name: name.to_owned(),
            context_file: None,
        }
    }

    fn test_started(class: &str, test: &str) -> HarnessEvent {
        HarnessEvent::TestStarted {
            class_name: class.to_owned(),
            test_name: test.to_owned(),
            start_time: Some(0),
        }
    }

    fn test_ended(class: &str, test: &str) -> HarnessEvent {
        HarnessEvent::TestEnded {
            class_name: class.to_owned(),
            test_name: test.to_owned(),
            end_time: Some(10),
            metrics: BTreeMap::new(),
        }
    }

    fn test_failed(class: &str, test: &str) -> HarnessEvent {
        HarnessEvent::TestFailed {
            class_name: class.to_owned(),
            test_name: test.to_owned(),
            trace: "t".to_owned(),
        }
    }

    #[test]
    fn happy_path_counts() {
        let mut tree = RunTree::new();
        tree.apply(0, module_started("m"));
        tree.apply(0, HarnessEvent::RunStarted { test_count: 2 });
        tree.apply(0, test_started("C", "a"));
        tree.apply(0, test_ended("C", "a"));
        tree.apply(0, test_started("C", "b"));
        tree.apply(0, test_failed("C", "b"));
        tree.apply(0, test_ended("C", "b"));
        tree.apply(0, HarnessEvent::RunEnded);
        tree.apply(0, HarnessEvent::ModuleEnded);
        tree.finalize();

        let stats = tree.stats();
        assert_eq!(stats.passed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.started, 2);
        assert_eq!(stats.incomplete_modules, 0);
        assert_eq!(stats.protocol_warnings, 0);
        assert!(!stats.is_success());
    }

    #[test]
    fn counter_identity_holds() {
        let mut tree = RunTree::new();
        tree.apply(0, module_started("m"));
        tree.apply(0, test_started("C", "a"));
        tree.apply(0, test_ended("C", "a"));
        tree.apply(0, test_started("C", "b"));
        tree.apply(0, HarnessEvent::TestIgnored {
            class_name: "C".to_owned(),
            test_name: "b".to_owned(),
        });
        tree.apply(0, test_ended("C", "b"));
        tree.apply(0, test_started("C", "c"));
        // `c` never ends.
        tree.apply(0, HarnessEvent::ModuleEnded);
        tree.finalize();

        let stats = tree.stats();
        assert_eq!(
            stats.started,
            stats.passed + stats.failed + stats.ignored + stats.assumption_failed + stats.incomplete
        );
        assert_eq!(stats.incomplete, 1);
    }

    #[test]
    fn unmatched_test_ended_is_a_warning() {
        let mut tree = RunTree::new();
        tree.apply(0, module_started("m"));
        let applied = tree.apply(0, test_ended("C", "ghost"));
        assert!(matches!(applied[0], Applied::Warning(_)));
        assert_eq!(tree.stats().protocol_warnings, 1);
        assert_eq!(tree.stats().started, 0);
    }

    #[test]
    fn double_transition_is_a_warning_not_a_crash() {
        let mut tree = RunTree::new();
        tree.apply(0, module_started("m"));
        tree.apply(0, test_started("C", "a"));
        tree.apply(0, test_failed("C", "a"));
        let applied = tree.apply(0, test_failed("C", "a"));
        assert!(matches!(applied[0], Applied::Warning(_)));
        // The first verdict stands.
        tree.apply(0, test_ended("C", "a"));
        assert_eq!(tree.stats().failed, 1);
    }

    #[test]
    fn unclosed_module_is_incomplete_and_fails_the_run() {
        let mut tree = RunTree::new();
        tree.apply(0, module_started("m"));
        tree.apply(0, test_started("C", "a"));
        tree.apply(0, test_ended("C", "a"));
        // No TEST_MODULE_ENDED before stream end.
        tree.finalize();

        let stats = tree.stats();
        assert_eq!(stats.passed, 1);
        assert_eq!(stats.incomplete_modules, 1);
        assert!(!stats.is_success());
    }

    #[test]
    fn module_ended_with_open_case_marks_it_incomplete() {
        let mut tree = RunTree::new();
        tree.apply(0, module_started("m"));
        tree.apply(0, test_started("C", "a"));
        let applied = tree.apply(0, HarnessEvent::ModuleEnded);
        match &applied[0] {
            Applied::ModuleEnded(summary) => assert_eq!(summary.incomplete, 1),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn implicit_module_closes_on_run_ended() {
        let mut tree = RunTree::new();
        tree.apply(0, HarnessEvent::RunStarted { test_count: 1 });
        tree.apply(0, test_started("C", "a"));
        tree.apply(0, test_ended("C", "a"));
        let applied = tree.apply(0, HarnessEvent::RunEnded);
        assert!(matches!(applied[0], Applied::ModuleEnded(_)));
        tree.finalize();
        let stats = tree.stats();
        assert_eq!(stats.incomplete_modules, 0);
        assert!(stats.is_success());
    }

    #[test]
    fn cross_connection_modules_do_not_interfere() {
        let mut tree = RunTree::new();
        tree.apply(1, module_started("m1"));
        tree.apply(2, module_started("m2"));
        tree.apply(1, test_started("C", "a"));
        tree.apply(2, test_started("C", "a"));
        tree.apply(1, test_ended("C", "a"));
        tree.apply(2, test_failed("C", "a"));
        tree.apply(2, test_ended("C", "a"));
        tree.apply(1, HarnessEvent::ModuleEnded);
        tree.apply(2, HarnessEvent::ModuleEnded);

        let stats = tree.stats();
        assert_eq!(stats.passed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.modules, 2);
        assert_eq!(stats.protocol_warnings, 0);
    }

    #[test]
    fn only_noise_fails_the_run() {
        let mut tree = RunTree::new();
        tree.apply(0, HarnessEvent::ProtocolWarning {
            message: "garbage".to_owned(),
        });
        tree.finalize();
        assert!(!tree.stats().is_success());
    }
}

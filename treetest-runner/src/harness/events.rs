// Copyright (c) The treetest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The harness event protocol.
//!
//! The wire format is line-oriented: `EVENT_NAME {json-object}`, newline
//! delimited. Multiple events may arrive in a single read and a partial
//! event may span reads, so each connection owns an [`EventBuffer`] that
//! assembles complete events out of raw bytes.
//!
//! The taxonomy is a closed enum dispatched by exhaustive match; anything
//! unrecognized or malformed becomes [`HarnessEvent::ProtocolWarning`] and
//! never aborts the stream.

use bytes::{Buf, BytesMut};
use serde::Deserialize;
use std::collections::BTreeMap;

/// One decoded event from the harness.
#[derive(Clone, Debug, PartialEq)]
pub enum HarnessEvent {
    /// A test module started; opens a module node.
    ModuleStarted {
        /// The module name.
        module_name: String,
        /// The harness-side context file for the module.
        context_file: Option<String>,
    },
    /// A test run within the module started.
    RunStarted {
        /// Expected case count for the module.
        test_count: usize,
    },
    /// A test case started.
    TestStarted {
        /// The case's class name.
        class_name: String,
        /// The case's test name.
        test_name: String,
        /// Harness-side start time in epoch milliseconds.
        start_time: Option<i64>,
    },
    /// A started case failed.
    TestFailed {
        /// The case's class name.
        class_name: String,
        /// The case's test name.
        test_name: String,
        /// The failure trace.
        trace: String,
    },
    /// A started case failed an assumption.
    TestAssumptionFailure {
        /// The case's class name.
        class_name: String,
        /// The case's test name.
        test_name: String,
        /// The assumption trace, if the harness sent one.
        trace: Option<String>,
    },
    /// A started case was ignored.
    TestIgnored {
        /// The case's class name.
        class_name: String,
        /// The case's test name.
        test_name: String,
    },
    /// A started case ended.
    TestEnded {
        /// The case's class name.
        class_name: String,
        /// The case's test name.
        test_name: String,
        /// Harness-side end time in epoch milliseconds.
        end_time: Option<i64>,
        /// Optional metrics attached by the harness.
        metrics: BTreeMap<String, String>,
    },
    /// The run section of the module closed.
    RunEnded,
    /// The module closed.
    ModuleEnded,
    /// A log file was associated with the current node.
    LogAssociation {
        /// The harness's name for the attachment.
        data_name: String,
        /// The path of the logged file.
        logged_file: String,
    },
    /// Malformed or unrecognized input. Counted and logged, never fatal.
    ProtocolWarning {
        /// A human-readable description.
        message: String,
    },
}

#[derive(Deserialize)]
struct ModuleStartedPayload {
    #[serde(rename = "moduleName")]
    module_name: String,
    #[serde(rename = "moduleContextFileName")]
    context_file: Option<String>,
}

#[derive(Deserialize)]
struct RunStartedPayload {
    #[serde(rename = "testCount", default)]
    test_count: usize,
}

#[derive(Deserialize)]
struct CasePayload {
    #[serde(rename = "className")]
    class_name: String,
    #[serde(rename = "testName")]
    test_name: String,
    #[serde(default)]
    start_time: Option<i64>,
    #[serde(default)]
    end_time: Option<i64>,
    #[serde(default)]
    trace: Option<String>,
    #[serde(default)]
    metrics: Option<BTreeMap<String, serde_json::Value>>,
}

#[derive(Deserialize)]
struct LogAssociationPayload {
    #[serde(rename = "dataName")]
    data_name: String,
    #[serde(rename = "loggedFile")]
    logged_file: String,
}

/// A per-connection byte buffer that assembles complete events.
#[derive(Debug, Default)]
pub struct EventBuffer {
    buf: BytesMut,
}

impl EventBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends raw bytes from a read.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// True if undecoded bytes remain.
    pub fn has_pending(&self) -> bool {
        self.buf.iter().any(|b| *b != b'\n')
    }

    /// Decodes every complete event currently buffered. Partial tails stay
    /// buffered for the next read.
    pub fn drain_events(&mut self) -> Vec<HarnessEvent> {
        let mut events = Vec::new();
        loop {
            match self.next_event() {
                Some(event) => events.push(event),
                None => break,
            }
        }
        events
    }

    fn next_event(&mut self) -> Option<HarnessEvent> {
        // Leading newlines separate events and carry no content.
        while self.buf.first() == Some(&b'\n') {
            self.buf.advance(1);
        }
        if self.buf.is_empty() {
            return None;
        }

        // Event name: uppercase/underscore run terminated by a space.
        enum NameScan {
            End(usize),
            Incomplete,
            Malformed(usize),
        }
        let mut scan = NameScan::Incomplete;
        for (i, byte) in self.buf.iter().enumerate() {
            match byte {
                b'A'..=b'Z' | b'_' => continue,
                b' ' if i > 0 => {
                    scan = NameScan::End(i);
                    break;
                }
                _ => {
                    scan = NameScan::Malformed(i);
                    break;
                }
            }
        }
        let name_end = match scan {
            NameScan::End(i) => i,
            // The name may still be arriving; wait for more bytes.
            NameScan::Incomplete => return None,
            NameScan::Malformed(i) => {
                return self.discard_line(&format!("malformed event line at byte {i}"));
            }
        };

        let json_start = name_end + 1;
        match self.buf.get(json_start) {
            None => return None,
            Some(b'{') => {}
            Some(_) => return self.discard_line("event payload does not start with '{'"),
        }

        let json_end = match scan_json_object(&self.buf[json_start..]) {
            JsonScan::Complete(len) => json_start + len,
            JsonScan::Incomplete => return None,
        };

        let name = String::from_utf8_lossy(&self.buf[..name_end]).into_owned();
        let body = String::from_utf8_lossy(&self.buf[json_start..json_end]).into_owned();
        self.buf.advance(json_end);

        Some(decode_event(&name, &body))
    }

    // Drops through the next newline (or everything, if none is buffered yet)
    // and reports a warning.
    fn discard_line(&mut self, message: &str) -> Option<HarnessEvent> {
        let dropped = match self.buf.iter().position(|b| *b == b'\n') {
            Some(pos) => {
                let dropped = String::from_utf8_lossy(&self.buf[..pos]).into_owned();
                self.buf.advance(pos + 1);
                dropped
            }
            None => {
                let dropped = String::from_utf8_lossy(&self.buf).into_owned();
                self.buf.clear();
                dropped
            }
        };
        Some(HarnessEvent::ProtocolWarning {
            message: format!("{message}: {dropped:?}"),
        })
    }
}

enum JsonScan {
    Complete(usize),
    Incomplete,
}

// Finds the end of a JSON object by brace depth, honoring strings and
// escapes. `bytes` must start with '{'.
fn scan_json_object(bytes: &[u8]) -> JsonScan {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, byte) in bytes.iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match byte {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return JsonScan::Complete(i + 1);
                }
            }
            _ => {}
        }
    }
    JsonScan::Incomplete
}

fn decode_event(name: &str, body: &str) -> HarnessEvent {
    let warning = |message: String| HarnessEvent::ProtocolWarning { message };

    macro_rules! payload {
        ($ty:ty) => {
            match serde_json::from_str::<$ty>(body) {
                Ok(payload) => payload,
                Err(err) => return warning(format!("bad {name} payload: {err}")),
            }
        };
    }

    match name {
        "TEST_MODULE_STARTED" => {
            let p = payload!(ModuleStartedPayload);
            HarnessEvent::ModuleStarted {
                module_name: p.module_name,
                context_file: p.context_file,
            }
        }
        "TEST_RUN_STARTED" => {
            let p = payload!(RunStartedPayload);
            HarnessEvent::RunStarted {
                test_count: p.test_count,
            }
        }
        "TEST_STARTED" => {
            let p = payload!(CasePayload);
            HarnessEvent::TestStarted {
                class_name: p.class_name,
                test_name: p.test_name,
                start_time: p.start_time,
            }
        }
        "TEST_FAILED" => {
            let p = payload!(CasePayload);
            HarnessEvent::TestFailed {
                class_name: p.class_name,
                test_name: p.test_name,
                trace: p.trace.unwrap_or_default(),
            }
        }
        "TEST_ASSUMPTION_FAILURE" => {
            let p = payload!(CasePayload);
            HarnessEvent::TestAssumptionFailure {
                class_name: p.class_name,
                test_name: p.test_name,
                trace: p.trace,
            }
        }
        "TEST_IGNORED" => {
            let p = payload!(CasePayload);
            HarnessEvent::TestIgnored {
                class_name: p.class_name,
                test_name: p.test_name,
            }
        }
        "TEST_ENDED" => {
            let p = payload!(CasePayload);
            HarnessEvent::TestEnded {
                class_name: p.class_name,
                test_name: p.test_name,
                end_time: p.end_time,
                metrics: p
                    .metrics
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(k, v)| (k, json_value_to_string(v)))
                    .collect(),
            }
        }
        "TEST_RUN_ENDED" => HarnessEvent::RunEnded,
        "TEST_MODULE_ENDED" => HarnessEvent::ModuleEnded,
        "LOG_ASSOCIATION" => {
            let p = payload!(LogAssociationPayload);
            HarnessEvent::LogAssociation {
                data_name: p.data_name,
                logged_file: p.logged_file,
            }
        }
        other => warning(format!("unknown event `{other}`")),
    }
}

fn json_value_to_string(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

//! Aggregated per-target outcomes

use crate::error::ErrorKind;
use crate::executor::ActionResult;
use serde::Serialize;
use std::fmt;
use std::io::Write;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub succeeded: usize,
    pub failed: usize,
    /// Targets that needed more than one attempt, whatever the outcome
    pub retried: usize,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} succeeded, {} failed, {} retried",
            self.succeeded, self.failed, self.retried
        )
    }
}

/// One entry per dispatched target, in input order
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub results: Vec<ActionResult>,
    pub summary: Summary,
}

impl DispatchReport {
    pub fn new(results: Vec<ActionResult>) -> Self {
        let summary = Summary {
            succeeded: results.iter().filter(|r| r.success).count(),
            failed: results.iter().filter(|r| !r.success).count(),
            retried: results.iter().filter(|r| r.retried()).count(),
        };
        Self { results, summary }
    }

    pub fn get(&self, target: &str) -> Option<&ActionResult> {
        self.results.iter().find(|r| r.target == target)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn all_succeeded(&self) -> bool {
        self.summary.failed == 0
    }

    /// 0 when every target succeeded, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.all_succeeded() {
            0
        } else {
            1
        }
    }

    /// `<target>\t<success|failure>\t<message>` per line
    pub fn write_text<W: Write>(&self, mut out: W) -> std::io::Result<()> {
        for result in &self.results {
            let status = if result.success { "success" } else { "failure" };
            writeln!(
                out,
                "{}\t{}\t{}",
                result.target,
                status,
                single_line(&result.message)
            )?;
        }
        Ok(())
    }
}

/// Tabs and newlines would break the line-delimited format
fn single_line(message: &str) -> String {
    message
        .split(|c: char| c == '\t' || c == '\n' || c == '\r')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Write-once slots, one per target, filled as tasks finish
#[derive(Debug)]
pub(crate) struct ReportSlots {
    names: Vec<String>,
    slots: Vec<Option<ActionResult>>,
}

impl ReportSlots {
    pub(crate) fn new(names: Vec<String>) -> Self {
        let slots = vec![None; names.len()];
        Self { names, slots }
    }

    pub(crate) fn record(&mut self, index: usize, result: ActionResult) {
        match self.slots.get_mut(index) {
            Some(slot @ None) => *slot = Some(result),
            Some(Some(_)) => {
                tracing::warn!(target = %result.target, "Ignoring duplicate result");
            }
            None => tracing::warn!("Result for unknown slot {}", index),
        }
    }

    /// Any slot left empty belongs to a task that was cut off at the deadline
    pub(crate) fn finish(self) -> DispatchReport {
        let results = self
            .names
            .into_iter()
            .zip(self.slots)
            .map(|(name, slot)| {
                slot.unwrap_or_else(|| {
                    ActionResult::failure(name, ErrorKind::Timeout, "deadline exceeded")
                        .with_attempts(0)
                })
            })
            .collect();
        DispatchReport::new(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_and_exit_code() {
        let report = DispatchReport::new(vec![
            ActionResult::success("a", "ok"),
            ActionResult::success("b", "ok").with_attempts(3),
            ActionResult::failure("c", ErrorKind::Auth, "denied"),
        ]);

        assert_eq!(
            report.summary,
            Summary {
                succeeded: 2,
                failed: 1,
                retried: 1
            }
        );
        assert_eq!(report.exit_code(), 1);
        assert_eq!(report.summary.to_string(), "2 succeeded, 1 failed, 1 retried");
    }

    #[test]
    fn test_empty_report_succeeds() {
        let report = DispatchReport::new(Vec::new());
        assert!(report.is_empty());
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn test_text_output_is_line_delimited() {
        let report = DispatchReport::new(vec![
            ActionResult::success("a", "guest defined"),
            ActionResult::failure("b", ErrorKind::Execution, "line one\n\tline two\n"),
        ]);

        let mut out = Vec::new();
        report.write_text(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "a\tsuccess\tguest defined\nb\tfailure\tline one line two\n"
        );
    }

    #[test]
    fn test_unfilled_slots_become_timeouts() {
        let mut slots = ReportSlots::new(vec!["a".into(), "b".into()]);
        slots.record(1, ActionResult::success("b", "ok"));
        slots.record(1, ActionResult::failure("b", ErrorKind::Execution, "late"));

        let report = slots.finish();
        assert_eq!(report.len(), 2);
        assert_eq!(report.results[0].target, "a");
        assert_eq!(report.results[0].error_kind, Some(ErrorKind::Timeout));
        assert!(report.get("b").unwrap().success);
    }
}

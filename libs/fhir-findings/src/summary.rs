//! Response summary: counts by severity and by source.

use crate::finding::{Finding, Severity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeverityCounts {
    pub errors: usize,
    pub warnings: usize,
    pub infos: usize,
}

impl SeverityCounts {
    fn bump(&mut self, severity: Severity) {
        match severity {
            Severity::Error => self.errors += 1,
            Severity::Warning => self.warnings += 1,
            Severity::Info => self.infos += 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    /// Total number of findings of any severity.
    pub total_errors: usize,
    pub error_count: usize,
    pub warning_count: usize,
    pub info_count: usize,
    pub by_source: BTreeMap<String, SeverityCounts>,
}

impl Summary {
    pub fn tally(findings: &[Finding]) -> Summary {
        let mut summary = Summary {
            total_errors: findings.len(),
            ..Summary::default()
        };
        for finding in findings {
            match finding.severity {
                Severity::Error => summary.error_count += 1,
                Severity::Warning => summary.warning_count += 1,
                Severity::Info => summary.info_count += 1,
            }
            summary
                .by_source
                .entry(finding.source.as_str().to_string())
                .or_default()
                .bump(finding.severity);
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ErrorCode;
    use crate::finding::FindingSource;

    #[test]
    fn test_tally_matches_findings() {
        let findings = vec![
            Finding::build(
                FindingSource::Structure,
                Severity::Error,
                ErrorCode::MandatoryMissing,
            )
            .detail("missingElement", "status")
            .finish()
            .unwrap(),
            Finding::build(FindingSource::Lint, Severity::Warning, ErrorCode::LintEmptyElement)
                .finish()
                .unwrap(),
            Finding::build(
                FindingSource::SpecHint,
                Severity::Info,
                ErrorCode::SpecHintMissingField,
            )
            .detail("missingElement", "status")
            .finish()
            .unwrap(),
        ];

        let summary = Summary::tally(&findings);
        assert_eq!(summary.total_errors, 3);
        assert_eq!(summary.error_count, 1);
        assert_eq!(summary.warning_count, 1);
        assert_eq!(summary.info_count, 1);
        assert_eq!(summary.by_source["STRUCTURE"].errors, 1);
        assert_eq!(summary.by_source["LINT"].warnings, 1);
    }
}

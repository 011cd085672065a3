//! `none` attestation: no statement, no trust.

use ciborium::value::Value;

use super::StatementOutcome;
use crate::error::{CeremonyError, Result};

pub(super) fn verify(statement: &[(Value, Value)]) -> Result<StatementOutcome> {
    if !statement.is_empty() {
        return Err(CeremonyError::malformed(
            "attStmt must be empty for none attestation",
        ));
    }
    Ok(StatementOutcome::None)
}

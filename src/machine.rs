use crate::config::{RunConfig, ROW_URL_IDENTITY_TOKEN};
use crate::gate::{GateError, InteractionGate, OperatorPrompt, PauseKind};
use crate::ledger::{
    LedgerError, RowStatus, TableStore, WorkingTable, DONE_AT_COLUMN, STATUS_COLUMN,
};
use crate::session::{SessionError, UiSession};
use crate::shared::logging::RunLog;
use crate::validate::{normalize_role, role_rank, validate_email, validate_identity};
use chrono::Local;

pub const IDENTITY_COLUMN: &str = "Agent User Name";
pub const FIRST_NAME_COLUMN: &str = "Name";
pub const LAST_NAME_COLUMN: &str = "Last Name";
pub const EMAIL_COLUMN: &str = "Email";
pub const ROLE_COLUMN: &str = "Role";

/// Columns a row must carry before the batch enters the per-row loop;
/// their absence is a startup error, not a per-row pending state.
pub const REQUIRED_COLUMNS: &[&str] = &[
    IDENTITY_COLUMN,
    FIRST_NAME_COLUMN,
    LAST_NAME_COLUMN,
    EMAIL_COLUMN,
    ROLE_COLUMN,
];

#[derive(Debug, thiserror::Error)]
pub enum MachineError {
    #[error(transparent)]
    Gate(#[from] GateError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// How one row left the state machine. Every exit here is terminal for the
/// row within this run; failures never exit, they loop back through a pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowExit {
    /// Driven through the UI to `Done` in this run.
    Completed,
    /// Already `Done` on entry; zero UI interactions performed.
    AlreadyDone,
    /// The row id vanished from the table (operator removed it mid-pause).
    Removed,
}

/// Tagged result of one UI phase. `Pending` maps to a `Pending - <reason>`
/// status, `Fatal` to an `Error - <kind>` status; both are retryable after a
/// mandatory pause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseOutcome {
    Success,
    Pending(String),
    Fatal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Navigate,
    OpenForm,
    Fill,
    SelectRole,
    Save,
    Confirm,
}

impl Phase {
    fn as_str(self) -> &'static str {
        match self {
            Phase::Navigate => "navigate",
            Phase::OpenForm => "open form",
            Phase::Fill => "fill fields",
            Phase::SelectRole => "select role",
            Phase::Save => "save",
            Phase::Confirm => "confirm save",
        }
    }

    fn pending_reason(self) -> &'static str {
        match self {
            Phase::Navigate => "page not reachable",
            Phase::OpenForm => "form not available",
            Phase::Fill => "form fields not available",
            Phase::SelectRole => "role option not available",
            Phase::Save => "save not clickable",
            // Submit was accepted but the success signal never arrived.
            Phase::Confirm => "save modal open",
        }
    }
}

fn outcome_for(phase: Phase, err: &SessionError) -> PhaseOutcome {
    if err.is_wait_failure() {
        PhaseOutcome::Pending(phase.pending_reason().to_string())
    } else {
        PhaseOutcome::Fatal(err.kind().to_string())
    }
}

#[derive(Debug, Clone)]
struct RowFields {
    identity: String,
    first_name: String,
    last_name: String,
    email: String,
    role: String,
}

impl RowFields {
    fn read(table: &WorkingTable, row: usize) -> Self {
        let cell = |name: &str| -> String {
            table
                .find_column(name)
                .map(|col| table.value(row, col).trim().to_string())
                .unwrap_or_default()
        };
        Self {
            identity: cell(IDENTITY_COLUMN),
            first_name: cell(FIRST_NAME_COLUMN),
            last_name: cell(LAST_NAME_COLUMN),
            email: cell(EMAIL_COLUMN),
            role: cell(ROLE_COLUMN),
        }
    }

    /// Field-level validation in a fixed order; the first failing check
    /// names the pending reason.
    fn validate(&self) -> Result<ValidatedRow, String> {
        if !validate_identity(&self.identity) {
            return Err("invalid username".to_string());
        }
        if !validate_email(&self.email) {
            return Err("invalid email".to_string());
        }
        if self.first_name.is_empty() || self.last_name.is_empty() {
            return Err("missing fields".to_string());
        }
        let canonical_role = normalize_role(&self.role);
        let rank = role_rank(&canonical_role);
        if rank == 0 {
            return Err(format!("unknown role: {}", self.role));
        }
        Ok(ValidatedRow {
            identity: self.identity.clone(),
            full_name: format!("{} {}", self.first_name, self.last_name),
            email: self.email.clone(),
            canonical_role,
            rank,
        })
    }
}

#[derive(Debug, Clone)]
struct ValidatedRow {
    identity: String,
    full_name: String,
    email: String,
    canonical_role: String,
    rank: usize,
}

/// Aligned one-row markdown table echoed to the run log for auditing what
/// was actually typed into the form.
fn audit_table(headers: &[&str], values: &[&str]) -> String {
    let widths: Vec<usize> = headers
        .iter()
        .zip(values)
        .map(|(h, v)| h.chars().count().max(v.chars().count()))
        .collect();
    let pad = |text: &str, width: usize| {
        let mut out = text.to_string();
        while out.chars().count() < width {
            out.push(' ');
        }
        out
    };
    let header_line = format!(
        "| {} |",
        headers
            .iter()
            .zip(&widths)
            .map(|(h, w)| pad(h, *w))
            .collect::<Vec<_>>()
            .join(" | ")
    );
    let sep_line = format!(
        "|{}|",
        widths
            .iter()
            .map(|w| "-".repeat(w + 2))
            .collect::<Vec<_>>()
            .join("|")
    );
    let row_line = format!(
        "| {} |",
        values
            .iter()
            .zip(&widths)
            .map(|(v, w)| pad(v, *w))
            .collect::<Vec<_>>()
            .join(" | ")
    );
    format!("{header_line}\n{sep_line}\n{row_line}")
}

/// Drives one row from raw data to a terminal outcome. Re-executes the whole
/// protocol from the top on every retry, re-reading the row fresh so edits
/// made by the operator during a pause take effect immediately.
pub struct RowMachine<'a, T: TableStore, S: UiSession, P: OperatorPrompt> {
    config: &'a RunConfig,
    store: &'a T,
    session: &'a mut S,
    gate: &'a mut InteractionGate<P>,
    log: &'a mut RunLog,
}

impl<'a, T: TableStore, S: UiSession, P: OperatorPrompt> RowMachine<'a, T, S, P> {
    pub fn new(
        config: &'a RunConfig,
        store: &'a T,
        session: &'a mut S,
        gate: &'a mut InteractionGate<P>,
        log: &'a mut RunLog,
    ) -> Self {
        Self {
            config,
            store,
            session,
            gate,
            log,
        }
    }

    pub fn process_row(&mut self, row_id: i64) -> Result<RowExit, MachineError> {
        loop {
            let table = self.store.load()?;
            let Some(row) = table.find_row(row_id) else {
                self.log.warn(&format!(
                    "row {row_id} not found in the working table (it may have been removed); skipping"
                ));
                return Ok(RowExit::Removed);
            };

            if table.status_of(row).is_done() {
                self.log
                    .info(&format!("row {row_id} already Done; skipping"));
                return Ok(RowExit::AlreadyDone);
            }

            let fields = RowFields::read(&table, row);
            let validated = match fields.validate() {
                Ok(validated) => validated,
                Err(reason) => {
                    self.log
                        .error(&format!("row {row_id}: validation failed: {reason}"));
                    self.persist_status(row_id, &RowStatus::Pending(reason))?;
                    self.gate.pause(
                        self.log,
                        PauseKind::Mandatory,
                        "Fix the working table and press ENTER to retry this row.",
                    )?;
                    continue;
                }
            };

            match self.drive_ui(row_id, &validated) {
                PhaseOutcome::Success => {
                    self.persist_status(row_id, &RowStatus::Done)?;
                    self.log.info(&format!(
                        "row {row_id}: created `{}` as {} and marked Done",
                        validated.identity, validated.canonical_role
                    ));
                    self.log.flush();
                    self.gate.pause(
                        self.log,
                        PauseKind::Conditional,
                        "Row done. Press ENTER to continue to the next row...",
                    )?;
                    return Ok(RowExit::Completed);
                }
                PhaseOutcome::Pending(reason) => {
                    self.persist_status(row_id, &RowStatus::Pending(reason))?;
                    self.gate.pause(
                        self.log,
                        PauseKind::Mandatory,
                        "Fix the browser/UI state and press ENTER to retry this row.",
                    )?;
                }
                PhaseOutcome::Fatal(kind) => {
                    self.persist_status(row_id, &RowStatus::Error(kind))?;
                    self.gate.pause(
                        self.log,
                        PauseKind::Mandatory,
                        "Unexpected UI failure. Fix and press ENTER to retry this row.",
                    )?;
                }
            }
        }
    }

    /// Read-modify-write of the row's status, written back immediately so a
    /// crash or operator inspection never sees stale progress.
    fn persist_status(&mut self, row_id: i64, status: &RowStatus) -> Result<(), LedgerError> {
        let mut table = self.store.load()?;
        let Some(row) = table.find_row(row_id) else {
            return Ok(());
        };
        if let Some(col) = table.column_index(STATUS_COLUMN) {
            table.set_value(row, col, status.as_cell());
        }
        if status.is_done() {
            if let Some(col) = table.column_index(DONE_AT_COLUMN) {
                table.set_value(row, col, Local::now().to_rfc3339());
            }
        }
        self.store.save(&table)
    }

    fn phase_failure(&mut self, row_id: i64, phase: Phase, err: &SessionError) -> PhaseOutcome {
        self.log.error(&format!(
            "row {row_id}: {} failed: {err}",
            phase.as_str()
        ));
        self.log.flush();
        outcome_for(phase, err)
    }

    fn fill_fields(&mut self, validated: &ValidatedRow) -> Result<(), SessionError> {
        let selectors = &self.config.selectors;
        let wait = self.config.timeouts.ui_wait();
        self.session
            .wait_until_present(&selectors.identity_field, wait)?;
        self.session
            .clear_and_type(&selectors.identity_field, &validated.identity)?;
        self.session
            .clear_and_type(&selectors.password_field, &self.config.password)?;
        self.session
            .clear_and_type(&selectors.confirm_password_field, &self.config.password)?;
        self.session
            .clear_and_type(&selectors.full_name_field, &validated.full_name)?;
        self.session
            .clear_and_type(&selectors.email_field, &validated.email)?;
        Ok(())
    }

    fn drive_ui(&mut self, row_id: i64, validated: &ValidatedRow) -> PhaseOutcome {
        let wait = self.config.timeouts.ui_wait();

        if let Some(template) = &self.config.row_url_template {
            let url = template.replace(
                ROW_URL_IDENTITY_TOKEN,
                urlencoding::encode(&validated.identity).as_ref(),
            );
            self.log.info(&format!("row {row_id}: navigating to {url}"));
            if let Err(err) = self.session.navigate(&url) {
                return self.phase_failure(row_id, Phase::Navigate, &err);
            }
        }

        // Detect-or-open: a form left open by a previous failed attempt is
        // reused instead of clicking the opener again.
        match self.session.is_present(&self.config.selectors.identity_field) {
            Ok(true) => self.log.info(&format!(
                "row {row_id}: form already open; filling in place"
            )),
            Ok(false) => {
                let opener = self.config.selectors.open_form.clone();
                if let Err(err) = self.session.wait_until_clickable_then_click(&opener, wait) {
                    return self.phase_failure(row_id, Phase::OpenForm, &err);
                }
            }
            Err(err) => return self.phase_failure(row_id, Phase::OpenForm, &err),
        }

        if let Err(err) = self.fill_fields(validated) {
            return self.phase_failure(row_id, Phase::Fill, &err);
        }

        let role_option = self.config.selectors.role_option(validated.rank);
        if let Err(err) = self
            .session
            .wait_until_clickable_then_click(&role_option, wait)
        {
            return self.phase_failure(row_id, Phase::SelectRole, &err);
        }

        let rank = validated.rank.to_string();
        self.log.info(&format!(
            "row {row_id}: filled form\n{}",
            audit_table(
                &["Username", "Full Name", "Email", "Role", "Rank"],
                &[
                    validated.identity.as_str(),
                    validated.full_name.as_str(),
                    validated.email.as_str(),
                    validated.canonical_role.as_str(),
                    rank.as_str(),
                ],
            )
        ));
        self.log.flush();

        let save_button = self.config.selectors.save_button.clone();
        if let Err(err) = self
            .session
            .wait_until_clickable_then_click(&save_button, wait)
        {
            return self.phase_failure(row_id, Phase::Save, &err);
        }

        // The form disappearing is the success signal.
        let form_marker = self.config.selectors.identity_field.clone();
        if let Err(err) = self.session.wait_until_invisible(&form_marker, wait) {
            return self.phase_failure(row_id, Phase::Confirm, &err);
        }

        PhaseOutcome::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Locator;

    #[test]
    fn audit_table_aligns_columns() {
        let rendered = audit_table(&["Username", "Role"], &["jd", "ticketing agent"]);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].len(), lines[2].len());
        assert!(lines[0].contains("Username"));
        assert!(lines[2].contains("ticketing agent"));
    }

    #[test]
    fn wait_failures_map_to_phase_pending_reasons() {
        let timeout = SessionError::Timeout {
            locator: Locator::id("acl-user-id").to_string(),
            after_secs: 20,
        };
        assert_eq!(
            outcome_for(Phase::Confirm, &timeout),
            PhaseOutcome::Pending("save modal open".to_string())
        );
        assert_eq!(
            outcome_for(Phase::OpenForm, &timeout),
            PhaseOutcome::Pending("form not available".to_string())
        );
    }

    #[test]
    fn hard_failures_map_to_error_kinds() {
        let stale = SessionError::Stale {
            locator: Locator::id("acl-user-id").to_string(),
        };
        assert_eq!(
            outcome_for(Phase::Fill, &stale),
            PhaseOutcome::Fatal("stale element".to_string())
        );
    }

    #[test]
    fn validation_order_reports_first_failure() {
        let mut fields = RowFields {
            identity: "jdoe".to_string(),
            first_name: "Jane".to_string(),
            last_name: "Doe".to_string(),
            email: "jane@example.com".to_string(),
            role: "Ticket Agent".to_string(),
        };
        let validated = fields.validate().expect("valid row");
        assert_eq!(validated.full_name, "Jane Doe");
        assert_eq!(validated.rank, 3);

        fields.email = "not-an-email".to_string();
        assert_eq!(fields.validate().expect_err("email"), "invalid email");

        fields.identity = "has space".to_string();
        assert_eq!(fields.validate().expect_err("identity"), "invalid username");

        fields.identity = "jdoe".to_string();
        fields.email = "jane@example.com".to_string();
        fields.last_name = String::new();
        assert_eq!(fields.validate().expect_err("missing"), "missing fields");

        fields.last_name = "Doe".to_string();
        fields.role = "Night Auditor".to_string();
        assert_eq!(
            fields.validate().expect_err("role"),
            "unknown role: Night Auditor"
        );
    }
}

use crate::config::{RowFilter, RunConfig};
use crate::gate::{GateError, InteractionGate, OperatorPrompt, PauseKind};
use crate::ledger::{LedgerError, TableStore, WorkingTable};
use crate::machine::{MachineError, RowExit, RowMachine, REQUIRED_COLUMNS};
use crate::session::{SessionError, UiSession};
use crate::shared::logging::RunLog;

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error(transparent)]
    Gate(#[from] GateError),
}

impl From<MachineError> for BatchError {
    fn from(err: MachineError) -> Self {
        match err {
            MachineError::Gate(err) => BatchError::Gate(err),
            MachineError::Ledger(err) => BatchError::Ledger(err),
        }
    }
}

/// Per-run tally of terminal row outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub selected: usize,
    pub completed: usize,
    pub already_done: usize,
    pub removed: usize,
}

impl BatchSummary {
    pub fn render(&self) -> String {
        format!(
            "{} row(s) selected: {} completed, {} already done, {} removed",
            self.selected, self.completed, self.already_done, self.removed
        )
    }
}

/// Row ids matching the filter, in table order. Comparison is trimmed and
/// case-insensitive; no filter selects every row.
pub fn resolve_row_ids(
    table: &WorkingTable,
    filter: Option<&RowFilter>,
) -> Result<Vec<i64>, LedgerError> {
    let Some(filter) = filter else {
        return Ok(table.row_ids());
    };
    let col = table.require_column(&filter.field)?;
    let wanted = filter.value.trim().to_lowercase();
    let all = table.row_ids();
    Ok(all
        .into_iter()
        .filter(|row_id| {
            table
                .find_row(*row_id)
                .is_some_and(|row| table.value(row, col).trim().to_lowercase() == wanted)
        })
        .collect())
}

/// Runs one batch end to end: snapshot the row ids up front, then drive each
/// row through the state machine in order. The session is opened only when
/// there is at least one row to process and is always closed on the way out.
pub struct BatchDriver<'a, T: TableStore, P: OperatorPrompt> {
    config: &'a RunConfig,
    store: &'a T,
    gate: &'a mut InteractionGate<P>,
    log: &'a mut RunLog,
}

impl<'a, T: TableStore, P: OperatorPrompt> BatchDriver<'a, T, P> {
    pub fn new(
        config: &'a RunConfig,
        store: &'a T,
        gate: &'a mut InteractionGate<P>,
        log: &'a mut RunLog,
    ) -> Self {
        Self {
            config,
            store,
            gate,
            log,
        }
    }

    pub fn run_with<S: UiSession>(
        mut self,
        open_session: impl FnOnce() -> Result<S, SessionError>,
    ) -> Result<BatchSummary, BatchError> {
        let table = self.store.load()?;
        for column in REQUIRED_COLUMNS {
            table.require_column(column)?;
        }

        let row_ids = resolve_row_ids(&table, self.config.filter.as_ref())?;
        let mut summary = BatchSummary {
            selected: row_ids.len(),
            ..BatchSummary::default()
        };
        match &self.config.filter {
            Some(filter) => self.log.info(&format!(
                "{} row(s) match filter {}={}",
                row_ids.len(),
                filter.field,
                filter.value
            )),
            None => self
                .log
                .info(&format!("{} row(s) selected (no filter)", row_ids.len())),
        }
        if row_ids.is_empty() {
            self.log.info("nothing to do");
            self.log.flush();
            return Ok(summary);
        }

        let mut session = open_session()?;
        let outcome = self.process_rows(&mut session, &row_ids, &mut summary);

        if let Err(err) = session.close() {
            self.log.warn(&format!("failed to close session: {err}"));
        }
        self.log.flush();
        outcome.map(|()| summary)
    }

    fn process_rows<S: UiSession>(
        &mut self,
        session: &mut S,
        row_ids: &[i64],
        summary: &mut BatchSummary,
    ) -> Result<(), BatchError> {
        session.navigate(&self.config.start_url)?;
        self.gate.pause(
            self.log,
            PauseKind::Mandatory,
            "After logging in completely, press ENTER to start processing rows.",
        )?;
        self.confirm_nav_surface(session)?;

        for row_id in row_ids {
            let mut machine =
                RowMachine::new(self.config, self.store, session, self.gate, self.log);
            match machine.process_row(*row_id)? {
                RowExit::Completed => summary.completed += 1,
                RowExit::AlreadyDone => summary.already_done += 1,
                RowExit::Removed => summary.removed += 1,
            }
        }

        self.log.info(&format!("batch finished: {}", summary.render()));
        self.gate.pause(
            self.log,
            PauseKind::Conditional,
            "All rows processed. Press ENTER to close the browser...",
        )?;
        Ok(())
    }

    /// Clicks into the management tab and confirms the form opener is
    /// reachable, pausing for the operator on each failed attempt. Rows are
    /// never attempted against a surface that has not been confirmed.
    fn confirm_nav_surface<S: UiSession>(&mut self, session: &mut S) -> Result<(), BatchError> {
        let wait = self.config.timeouts.ui_wait();
        loop {
            let reached = session
                .wait_until_clickable_then_click(&self.config.selectors.nav_tab, wait)
                .and_then(|()| {
                    session.wait_until_present(&self.config.selectors.open_form, wait)
                });
            match reached {
                Ok(()) => {
                    self.log.info("management surface confirmed");
                    return Ok(());
                }
                Err(err) => {
                    self.log
                        .error(&format!("management surface not reachable: {err}"));
                    self.gate.pause(
                        self.log,
                        PauseKind::Mandatory,
                        "Could not reach the user management surface. Fix the page and press ENTER to retry.",
                    )?;
                }
            }
        }
    }
}

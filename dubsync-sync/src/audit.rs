//! Audit trail: one row per reconciled task in the audit-log table.

use chrono::NaiveDateTime;

use dubsync_core::{Cell, StatusCode, Task};

use crate::context::RunContext;
use crate::error::SyncError;

pub const AUDIT_HEADER: &[&str] = &[
    "At",
    "Table",
    "Key",
    "OriginEnv",
    "User",
    "Status",
    "Change",
    "ChangeHtml",
];

/// Append an entry for `task` and return its reference (`dataset/table#row`).
pub fn record(
    ctx: &mut RunContext,
    task: &Task,
    outcome: StatusCode,
    at: NaiveDateTime,
    plain: &str,
    html: &str,
) -> Result<String, SyncError> {
    let log = ctx.ws.config.audit_log.clone();
    let user = ctx.users.display(&task.user);
    let row = vec![
        Cell::from(at),
        Cell::from(task.table.0.as_str()),
        Cell::from(task.key.as_str()),
        Cell::from(task.origin_env.0.as_str()),
        Cell::from(user),
        Cell::from(outcome.as_str()),
        Cell::from(plain.trim_end()),
        Cell::from(html.trim_end()),
    ];
    let index = ctx.append_row(&log, row)?;
    Ok(format!("{log}#{}", index + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{at, Fixture};
    use dubsync_core::types::cell_at;
    use dubsync_core::TaskAction;

    #[test]
    fn entries_reference_their_row() {
        let fx = Fixture::new();
        let mut ctx = fx.ctx();
        let task = Task::new("Role", "R1", "prod", TaskAction::Edit, "ana", None);
        let first = record(&mut ctx, &task, StatusCode::Incorporated, at(9, 0), "log\n", "").unwrap();
        let second = record(&mut ctx, &task, StatusCode::Unchanged, at(9, 1), "", "").unwrap();
        assert_eq!(first, "ops/Log#1");
        assert_eq!(second, "ops/Log#2");

        let rows = fx.rows("ops", "Log");
        assert_eq!(cell_at(&rows[0], 5).as_text(), "Incorporated");
        assert_eq!(cell_at(&rows[0], 6).as_text(), "log");
    }
}

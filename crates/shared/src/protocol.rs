use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{Board, BoardError, Column, DocumentKey, TaskId, TaskItem};

/// Wire form of a task. Status and position are implicit: the containing
/// column key carries the status, the list index carries the position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub title: String,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
}

/// The full board document written to and read from the remote store:
/// a mapping of column name to ordered task records. Written atomically as a
/// whole; last writer wins at document granularity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardDocument {
    #[serde(default)]
    pub columns: BTreeMap<Column, Vec<TaskRecord>>,
}

impl BoardDocument {
    pub fn from_board(board: &Board) -> Self {
        let mut columns = BTreeMap::new();
        for column in Column::ALL {
            let records = board
                .tasks_in(column)
                .iter()
                .map(|task| TaskRecord {
                    id: task.id,
                    title: task.title.clone(),
                    tags: task.tags.clone(),
                    created_at: task.created_at,
                })
                .collect();
            columns.insert(column, records);
        }
        Self { columns }
    }

    pub fn into_board(self) -> Result<Board, BoardError> {
        let mut columns: BTreeMap<Column, Vec<TaskItem>> = BTreeMap::new();
        for (column, records) in self.columns {
            let tasks = records
                .into_iter()
                .map(|record| TaskItem {
                    id: record.id,
                    title: record.title,
                    tags: record.tags,
                    status: column,
                    position: 0,
                    created_at: record.created_at,
                })
                .collect();
            columns.insert(column, tasks);
        }
        Board::from_columns(columns)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum StoreEvent {
    DocumentUpdated { key: DocumentKey, value: Value },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(title: &str) -> TaskRecord {
        TaskRecord {
            id: TaskId::generate(),
            title: title.to_string(),
            tags: BTreeSet::new(),
            created_at: "2025-06-01T12:00:00Z".parse().expect("timestamp"),
        }
    }

    #[test]
    fn document_decodes_into_board_with_derived_status_and_positions() {
        let first = record("first");
        let second = record("second");
        let mut columns = BTreeMap::new();
        columns.insert(Column::Backlog, vec![first.clone(), second.clone()]);

        let board = BoardDocument { columns }.into_board().expect("decode");

        let task = board.task(second.id).expect("second");
        assert_eq!(task.status, Column::Backlog);
        assert_eq!(task.position, 1);
        assert!(board.tasks_in(Column::Done).is_empty());
    }

    #[test]
    fn document_with_duplicate_task_id_is_rejected() {
        let shared = record("twice");
        let mut columns = BTreeMap::new();
        columns.insert(Column::Backlog, vec![shared.clone()]);
        columns.insert(Column::Done, vec![shared.clone()]);

        assert_eq!(
            BoardDocument { columns }.into_board(),
            Err(BoardError::DuplicateTask(shared.id))
        );
    }

    #[test]
    fn unknown_column_name_fails_to_deserialize() {
        let value = json!({
            "columns": {
                "someday": []
            }
        });

        assert!(serde_json::from_value::<BoardDocument>(value).is_err());
    }

    #[test]
    fn absent_columns_decode_as_empty_board() {
        let value = json!({});

        let document: BoardDocument = serde_json::from_value(value).expect("decode");
        let board = document.into_board().expect("board");
        assert_eq!(board.task_count(), 0);
    }

    #[test]
    fn round_trip_preserves_column_order() {
        let board = Board::empty()
            .append_task(
                Column::ThisWeek,
                TaskItem::new("ship docs", BTreeSet::new(), Column::ThisWeek),
            )
            .expect("append");

        let document = BoardDocument::from_board(&board);
        let decoded = document.into_board().expect("decode");
        assert_eq!(decoded, board);
    }
}

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    str::FromStr,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

macro_rules! key_newtype {
    ($name:ident) => {
        #[derive(
            Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

key_newtype!(ContentId);
key_newtype!(DocumentKey);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(value)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    Backlog,
    ThisWeek,
    Done,
}

impl Column {
    pub const ALL: [Column; 3] = [Column::Backlog, Column::ThisWeek, Column::Done];

    pub fn label(self) -> &'static str {
        match self {
            Column::Backlog => "Backlog",
            Column::ThisWeek => "This Week",
            Column::Done => "Done",
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown column '{0}'")]
pub struct UnknownColumn(String);

impl FromStr for Column {
    type Err = UnknownColumn;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().replace('-', "_").as_str() {
            "backlog" => Ok(Column::Backlog),
            "this_week" | "thisweek" => Ok(Column::ThisWeek),
            "done" => Ok(Column::Done),
            _ => Err(UnknownColumn(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskItem {
    pub id: TaskId,
    pub title: String,
    pub tags: BTreeSet<String>,
    pub status: Column,
    pub position: usize,
    pub created_at: DateTime<Utc>,
}

impl TaskItem {
    pub fn new(title: impl Into<String>, tags: BTreeSet<String>, status: Column) -> Self {
        Self {
            id: TaskId::generate(),
            title: title.into(),
            tags,
            status,
            position: 0,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BoardError {
    #[error("task {0} is not on the board")]
    UnknownTask(TaskId),
    #[error("task {0} appears more than once on the board")]
    DuplicateTask(TaskId),
    #[error("task {0} disagrees with its containing column")]
    Misplaced(TaskId),
}

/// Ordered task sequences partitioned by column. All transition methods are
/// pure: they leave `self` untouched and return the successor board with
/// positions renumbered densely per column and `status` matching the
/// containing column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    columns: BTreeMap<Column, Vec<TaskItem>>,
}

impl Board {
    pub fn empty() -> Self {
        let mut columns = BTreeMap::new();
        for column in Column::ALL {
            columns.insert(column, Vec::new());
        }
        Self { columns }
    }

    pub(crate) fn from_columns(
        columns: BTreeMap<Column, Vec<TaskItem>>,
    ) -> Result<Self, BoardError> {
        let mut board = Self { columns };
        for column in Column::ALL {
            board.columns.entry(column).or_default();
        }
        board.renumber();
        board.validate()?;
        Ok(board)
    }

    pub fn tasks_in(&self, column: Column) -> &[TaskItem] {
        self.columns.get(&column).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn task_count(&self) -> usize {
        self.columns.values().map(Vec::len).sum()
    }

    pub fn locate(&self, task_id: TaskId) -> Option<(Column, usize)> {
        for (column, tasks) in &self.columns {
            if let Some(index) = tasks.iter().position(|task| task.id == task_id) {
                return Some((*column, index));
            }
        }
        None
    }

    pub fn task(&self, task_id: TaskId) -> Option<&TaskItem> {
        let (column, index) = self.locate(task_id)?;
        self.columns.get(&column).and_then(|tasks| tasks.get(index))
    }

    /// Removes the task from its current column, then inserts it at
    /// `target_index` of the post-removal target sequence (clamped to the
    /// column length).
    pub fn apply_move(
        &self,
        task_id: TaskId,
        target: Column,
        target_index: usize,
    ) -> Result<Board, BoardError> {
        let mut next = self.clone();
        let task = next
            .take(task_id)
            .ok_or(BoardError::UnknownTask(task_id))?;
        next.insert_at(target, target_index, task);
        next.renumber();
        Ok(next)
    }

    pub fn append_task(&self, column: Column, task: TaskItem) -> Result<Board, BoardError> {
        if self.locate(task.id).is_some() {
            return Err(BoardError::DuplicateTask(task.id));
        }
        let mut next = self.clone();
        let tasks = next.columns.entry(column).or_default();
        tasks.push(task);
        next.renumber();
        Ok(next)
    }

    pub fn remove_task(&self, task_id: TaskId) -> Result<Board, BoardError> {
        let mut next = self.clone();
        next.take(task_id).ok_or(BoardError::UnknownTask(task_id))?;
        next.renumber();
        Ok(next)
    }

    pub fn edit_task(
        &self,
        task_id: TaskId,
        title: impl Into<String>,
        tags: BTreeSet<String>,
    ) -> Result<Board, BoardError> {
        let mut next = self.clone();
        let (column, index) = next.locate(task_id).ok_or(BoardError::UnknownTask(task_id))?;
        if let Some(task) = next
            .columns
            .get_mut(&column)
            .and_then(|tasks| tasks.get_mut(index))
        {
            task.title = title.into();
            task.tags = tags;
        }
        Ok(next)
    }

    pub fn validate(&self) -> Result<(), BoardError> {
        let mut seen = BTreeSet::new();
        for (column, tasks) in &self.columns {
            for (index, task) in tasks.iter().enumerate() {
                if !seen.insert(task.id) {
                    return Err(BoardError::DuplicateTask(task.id));
                }
                if task.status != *column || task.position != index {
                    return Err(BoardError::Misplaced(task.id));
                }
            }
        }
        Ok(())
    }

    fn take(&mut self, task_id: TaskId) -> Option<TaskItem> {
        for tasks in self.columns.values_mut() {
            if let Some(index) = tasks.iter().position(|task| task.id == task_id) {
                return Some(tasks.remove(index));
            }
        }
        None
    }

    fn insert_at(&mut self, column: Column, index: usize, task: TaskItem) {
        let tasks = self.columns.entry(column).or_default();
        let index = index.min(tasks.len());
        tasks.insert(index, task);
    }

    fn renumber(&mut self) {
        for (column, tasks) in &mut self.columns {
            for (index, task) in tasks.iter_mut().enumerate() {
                task.status = *column;
                task.position = index;
            }
        }
    }
}

//! Reply-tree reads. Each traversal loads the subtree inside one read
//! snapshot and walks it with an explicit stack, so thread depth is bounded
//! only by memory.

use std::collections::HashMap;

use rusqlite::Connection;
use uuid::Uuid;

use courier_types::{Message, ThreadNode};

use crate::models::{MESSAGE_COLUMNS, message_from_row};
use crate::queries::require_message;
use crate::{Database, Result};

impl Database {
    /// Every reply below `message_id`, depth-first with each parent before
    /// its children and siblings in creation order.
    pub fn get_all_replies(&self, message_id: Uuid) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let root = require_message(conn, message_id)?;
            let children = load_descendants(conn, root.id)?;
            Ok(preorder(root.id, children)
                .into_iter()
                .map(|(message, _)| message)
                .collect())
        })
    }

    /// The thread rooted at `message_id` as a nested tree, in the same order
    /// as [`Database::get_all_replies`].
    pub fn get_threaded_view(&self, message_id: Uuid) -> Result<ThreadNode> {
        self.with_conn(|conn| {
            let root = require_message(conn, message_id)?;
            let children = load_descendants(conn, root.id)?;
            Ok(build_tree(root, children))
        })
    }

    /// The top-level message of the thread containing `message_id`.
    pub fn thread_root(&self, message_id: Uuid) -> Result<Message> {
        self.with_conn(|conn| {
            let mut current = require_message(conn, message_id)?;
            let ancestors = ancestor_ids(conn, message_id)?;
            if let Some(top) = ancestors.last() {
                current = require_message(conn, *top)?;
            }
            Ok(current)
        })
    }
}

/// Whether `target` is `start` or one of its ancestors.
pub(crate) fn chain_contains(conn: &Connection, start: Uuid, target: Uuid) -> Result<bool> {
    if start == target {
        return Ok(true);
    }
    Ok(ancestor_ids(conn, start)?.contains(&target))
}

/// Parent chain of `message_id`, nearest first, excluding the message itself.
fn ancestor_ids(conn: &Connection, message_id: Uuid) -> Result<Vec<Uuid>> {
    // `depth` orders the chain and is capped at the table size, so even a
    // corrupted cycle terminates.
    let mut stmt = conn.prepare(
        "WITH RECURSIVE chain(id, depth) AS (
             SELECT parent_id, 1 FROM messages WHERE id = ?1
             UNION
             SELECT m.parent_id, c.depth + 1
             FROM messages m JOIN chain c ON m.id = c.id
             WHERE c.depth <= (SELECT COUNT(*) FROM messages)
         )
         SELECT id FROM chain WHERE id IS NOT NULL ORDER BY depth",
    )?;

    let rows = stmt
        .query_map([message_id.to_string()], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut ids = Vec::with_capacity(rows.len());
    for raw in rows {
        let id: Uuid = raw.parse().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?;
        if id == message_id || ids.contains(&id) {
            break;
        }
        ids.push(id);
    }
    Ok(ids)
}

/// All descendants of `root_id`, grouped by parent id, each group in
/// creation order.
fn load_descendants(conn: &Connection, root_id: Uuid) -> Result<HashMap<Uuid, Vec<Message>>> {
    let sql = format!(
        "WITH RECURSIVE subtree(id) AS (
             SELECT id FROM messages WHERE parent_id = ?1
             UNION
             SELECT m.id FROM messages m JOIN subtree s ON m.parent_id = s.id
         )
         SELECT {MESSAGE_COLUMNS} FROM messages
         WHERE id IN (SELECT id FROM subtree)
         ORDER BY created_at ASC, rowid ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([root_id.to_string()], message_from_row)?;

    let mut children: HashMap<Uuid, Vec<Message>> = HashMap::new();
    for row in rows {
        let message = row?;
        if let Some(parent) = message.parent {
            children.entry(parent).or_default().push(message);
        }
    }
    Ok(children)
}

/// Depth-first walk below `root_id`. Each entry carries the ids of the
/// message's direct children. Removing groups from the map as they are
/// visited guarantees every message is emitted at most once.
fn preorder(
    root_id: Uuid,
    mut children: HashMap<Uuid, Vec<Message>>,
) -> Vec<(Message, Vec<Uuid>)> {
    let mut out = Vec::new();
    let mut stack: Vec<Message> = children.remove(&root_id).unwrap_or_default();
    stack.reverse();

    while let Some(message) = stack.pop() {
        let kids = children.remove(&message.id).unwrap_or_default();
        let kid_ids = kids.iter().map(|k| k.id).collect();
        stack.extend(kids.into_iter().rev());
        out.push((message, kid_ids));
    }
    out
}

/// Assemble the nested view bottom-up: walking the preorder list backwards
/// guarantees every child node is finished before its parent.
fn build_tree(root: Message, children: HashMap<Uuid, Vec<Message>>) -> ThreadNode {
    let root_kids: Vec<Uuid> = children
        .get(&root.id)
        .map(|kids| kids.iter().map(|k| k.id).collect())
        .unwrap_or_default();
    let mut order = preorder(root.id, children);

    let mut built: HashMap<Uuid, ThreadNode> = HashMap::with_capacity(order.len());
    while let Some((message, kid_ids)) = order.pop() {
        let id = message.id;
        let node = ThreadNode {
            message,
            children: kid_ids.iter().filter_map(|k| built.remove(k)).collect(),
        };
        built.insert(id, node);
    }

    ThreadNode {
        message: root,
        children: root_kids.iter().filter_map(|k| built.remove(k)).collect(),
    }
}

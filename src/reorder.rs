use std::collections::{HashMap, VecDeque};

use crate::error::{DockError, Result};
use crate::model::{leaf_count, AppItem, AppList};

/// On-screen geometry of one top-level row, in display order.
#[derive(Clone, Debug, PartialEq)]
pub struct RowGeometry {
    pub url: String,
    pub top: f64,
    pub height: f64,
    pub dragging: bool,
}

impl RowGeometry {
    fn midpoint(&self) -> f64 {
        self.top + self.height / 2.0
    }
}

/// First non-dragging row whose vertical midpoint lies below the pointer.
pub fn insert_before(rows: &[RowGeometry], pointer_y: f64) -> Option<&RowGeometry> {
    rows.iter()
        .find(|row| !row.dragging && pointer_y < row.midpoint())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DropOutcome {
    /// Dropped onto itself; nothing to persist.
    Unchanged,
    /// A plain item was appended to the target group.
    AddedToGroup { list: AppList, group: usize },
    /// Two plain items became a new group.
    Grouped { list: AppList, group: usize },
    /// Order re-derived from the final on-screen order.
    Reordered { list: AppList },
}

impl DropOutcome {
    pub fn list(&self) -> Option<&AppList> {
        match self {
            DropOutcome::Unchanged => None,
            DropOutcome::AddedToGroup { list, .. }
            | DropOutcome::Grouped { list, .. }
            | DropOutcome::Reordered { list } => Some(list),
        }
    }
}

/// State of one drag gesture, anchored to the list as it was persisted when
/// the gesture began.
#[derive(Clone, Debug)]
pub struct DragSession {
    snapshot: AppList,
    dragged: usize,
    /// Preview order as indices into `snapshot`.
    order: Vec<usize>,
}

impl DragSession {
    pub fn begin(snapshot: AppList, dragged: usize) -> Result<Self> {
        if dragged >= snapshot.len() {
            return Err(DockError::InvalidTarget(format!(
                "cannot drag index {} of a {}-item list",
                dragged,
                snapshot.len()
            )));
        }
        let order = (0..snapshot.len()).collect();
        Ok(Self {
            snapshot,
            dragged,
            order,
        })
    }

    pub fn dragged_index(&self) -> usize {
        self.dragged
    }

    pub fn dragged(&self) -> &AppItem {
        &self.snapshot[self.dragged]
    }

    pub fn snapshot(&self) -> &[AppItem] {
        &self.snapshot
    }

    /// Urls in the current preview order.
    pub fn preview_urls(&self) -> Vec<String> {
        self.order
            .iter()
            .map(|&index| self.snapshot[index].url.clone())
            .collect()
    }

    /// Moves the dragged entry in the preview order to sit before the row the
    /// pointer is above. Returns its new display position when it moved.
    pub fn preview(&mut self, rows: &[RowGeometry], pointer_y: f64) -> Option<usize> {
        let from = self.order.iter().position(|&index| index == self.dragged)?;
        let before_url = insert_before(rows, pointer_y).map(|row| row.url.as_str());

        let mut order: Vec<usize> = self.order.clone();
        order.remove(from);
        let to = before_url
            .and_then(|url| {
                order
                    .iter()
                    .position(|&index| self.snapshot[index].url == url)
            })
            .unwrap_or(order.len());
        order.insert(to, self.dragged);

        if order == self.order {
            return None;
        }
        self.order = order;
        Some(to)
    }

    /// Resolves the gesture. `target_url` is the entry under the pointer at
    /// release (excluding the dragged one); `displayed` is the final on-screen
    /// order, defaulting to the preview order.
    pub fn finish(self, target_url: Option<&str>, displayed: Option<&[String]>) -> Result<DropOutcome> {
        let target = match target_url {
            Some(url) if url == self.dragged().url => Some(self.dragged),
            Some(url) => self
                .snapshot
                .iter()
                .enumerate()
                .position(|(index, item)| index != self.dragged && item.url == url),
            None => None,
        };

        if let Some(target) = target {
            if target == self.dragged {
                return Ok(DropOutcome::Unchanged);
            }
            let dragged_item = &self.snapshot[self.dragged];
            let target_item = &self.snapshot[target];
            if target_item.is_group && !dragged_item.is_group {
                return Ok(append_to_group(self.snapshot, self.dragged, target));
            }
            if !target_item.is_group && !dragged_item.is_group {
                return Ok(create_group(self.snapshot, self.dragged, target));
            }
        }

        let displayed = match displayed {
            Some(displayed) => displayed.to_vec(),
            None => self.preview_urls(),
        };
        let list = reconcile_order(&self.snapshot, &displayed)?;
        Ok(DropOutcome::Reordered { list })
    }
}

fn append_to_group(mut list: AppList, dragged: usize, target: usize) -> DropOutcome {
    let moved = list.remove(dragged).into_plain();
    let group = if dragged < target { target - 1 } else { target };
    list[group].children.get_or_insert_with(Vec::new).push(moved);
    DropOutcome::AddedToGroup { list, group }
}

fn create_group(mut list: AppList, dragged: usize, target: usize) -> DropOutcome {
    let (high, low) = if dragged > target {
        (dragged, target)
    } else {
        (target, dragged)
    };
    let high_item = list.remove(high);
    let low_item = list.remove(low);
    let (target_item, dragged_item) = if high == target {
        (high_item, low_item)
    } else {
        (low_item, high_item)
    };

    let group = AppItem::group(
        format!("Group {}", target_item.title),
        target_item.url.clone(),
        target_item.favicon.clone(),
        vec![target_item.into_plain(), dragged_item.into_plain()],
    );
    list.insert(low, group);
    DropOutcome::Grouped { list, group: low }
}

/// Rebuilds the list in `displayed` order by joining on url. Fails closed if
/// any url is unknown or the count changed.
pub fn reconcile_order(snapshot: &[AppItem], displayed: &[String]) -> Result<AppList> {
    if displayed.len() != snapshot.len() {
        return Err(DockError::Consistency(format!(
            "displayed {} entries but {} were persisted",
            displayed.len(),
            snapshot.len()
        )));
    }

    let mut by_url: HashMap<&str, VecDeque<&AppItem>> = HashMap::new();
    for item in snapshot {
        by_url.entry(item.url.as_str()).or_default().push_back(item);
    }

    let mut list = Vec::with_capacity(snapshot.len());
    for url in displayed {
        let item = by_url
            .get_mut(url.as_str())
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| DockError::Consistency(format!("displayed entry {} has no record", url)))?;
        list.push(item.clone());
    }

    if leaf_count(&list) != leaf_count(snapshot) {
        return Err(DockError::Consistency("entry count changed during reorder".to_string()));
    }
    Ok(list)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str) -> AppItem {
        AppItem::new(name, format!("https://{}.example/", name.to_lowercase()), format!("icon-{}", name))
    }

    fn url(name: &str) -> String {
        format!("https://{}.example/", name.to_lowercase())
    }

    fn rows(names: &[&str], dragging: &str) -> Vec<RowGeometry> {
        names
            .iter()
            .enumerate()
            .map(|(index, name)| RowGeometry {
                url: url(name),
                top: index as f64 * 40.0,
                height: 40.0,
                dragging: *name == dragging,
            })
            .collect()
    }

    #[test]
    fn plain_onto_plain_creates_group_with_target_first() {
        let session = DragSession::begin(vec![item("A"), item("B")], 0).expect("begin");
        let outcome = session.finish(Some(url("B").as_str()), None).expect("finish");
        let expected = vec![AppItem::group("Group B", url("B"), "icon-B", vec![item("B"), item("A")])];
        assert_eq!(outcome, DropOutcome::Grouped { list: expected, group: 0 });
    }

    #[test]
    fn group_is_inserted_at_lower_index_when_dragging_upwards() {
        let session = DragSession::begin(vec![item("A"), item("B"), item("C"), item("D")], 3).expect("begin");
        let outcome = session.finish(Some(url("B").as_str()), None).expect("finish");
        let list = outcome.list().expect("list").clone();
        assert_eq!(list.len(), 3);
        assert_eq!(list[0], item("A"));
        assert_eq!(list[1].title, "Group B");
        assert_eq!(list[1].children(), &[item("B"), item("D")]);
        assert_eq!(list[2], item("C"));
    }

    #[test]
    fn plain_onto_group_appends_child() {
        let group = AppItem::group("Group G", url("X"), "", vec![item("X"), item("Y")]);
        let session = DragSession::begin(vec![group, item("Z")], 1).expect("begin");
        let outcome = session.finish(Some(url("X").as_str()), None).expect("finish");
        let expected = vec![AppItem::group("Group G", url("X"), "", vec![item("X"), item("Y"), item("Z")])];
        assert_eq!(outcome, DropOutcome::AddedToGroup { list: expected, group: 0 });
    }

    #[test]
    fn dragging_from_before_group_shifts_group_index() {
        let group = AppItem::group("Group G", url("X"), "", vec![item("X")]);
        let session = DragSession::begin(vec![item("A"), item("B"), group], 0).expect("begin");
        match session.finish(Some(url("X").as_str()), None).expect("finish") {
            DropOutcome::AddedToGroup { list, group } => {
                assert_eq!(group, 1);
                assert_eq!(list[0], item("B"));
                assert_eq!(list[1].children(), &[item("X"), item("A")]);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn dropping_onto_itself_is_a_noop() {
        let session = DragSession::begin(vec![item("A"), item("B")], 1).expect("begin");
        assert_eq!(session.finish(Some(url("B").as_str()), None).expect("finish"), DropOutcome::Unchanged);
    }

    #[test]
    fn group_dragged_onto_anything_is_a_plain_reorder() {
        let group = AppItem::group("Group G", url("X"), "", vec![item("X"), item("Y")]);
        let other = AppItem::group("Group H", url("H"), "", vec![item("H")]);
        let snapshot = vec![group.clone(), item("A"), other.clone()];
        let session = DragSession::begin(snapshot, 0).expect("begin");
        let displayed = vec![url("A"), url("X"), url("H")];
        let outcome = session.finish(Some(url("H").as_str()), Some(displayed.as_slice())).expect("finish");
        assert_eq!(
            outcome,
            DropOutcome::Reordered {
                list: vec![item("A"), group, other]
            }
        );
    }

    #[test]
    fn preview_moves_dragged_before_first_row_below_pointer() {
        let names = ["A", "B", "C", "D"];
        let mut session =
            DragSession::begin(names.iter().map(|n| item(n)).collect(), 0).expect("begin");

        // Pointer just above C's midpoint (C spans 80..120).
        assert_eq!(session.preview(&rows(&names, "A"), 95.0), Some(1));
        assert_eq!(session.preview_urls(), vec![url("B"), url("A"), url("C"), url("D")]);

        // Same spot again yields no movement.
        let reordered = ["B", "A", "C", "D"];
        assert_eq!(session.preview(&rows(&reordered, "A"), 95.0), None);

        // Below every midpoint: append.
        assert_eq!(session.preview(&rows(&reordered, "A"), 500.0), Some(3));
        let outcome = session.finish(None, None).expect("finish");
        assert_eq!(
            outcome,
            DropOutcome::Reordered {
                list: vec![item("B"), item("C"), item("D"), item("A")]
            }
        );
    }

    #[test]
    fn reconcile_fails_closed_on_unknown_url_or_count_mismatch() {
        let snapshot = vec![item("A"), item("B")];
        assert!(matches!(
            reconcile_order(&snapshot, &[url("A"), url("Q")]),
            Err(DockError::Consistency(_))
        ));
        assert!(matches!(
            reconcile_order(&snapshot, &[url("A")]),
            Err(DockError::Consistency(_))
        ));
        assert!(matches!(
            reconcile_order(&snapshot, &[url("A"), url("A")]),
            Err(DockError::Consistency(_))
        ));
    }

    #[test]
    fn every_drop_preserves_leaf_count() {
        let snapshot = vec![
            item("A"),
            AppItem::group("Group G", url("X"), "", vec![item("X"), item("Y")]),
            item("B"),
            item("C"),
        ];
        let before = leaf_count(&snapshot);
        for dragged in 0..snapshot.len() {
            for target in 0..snapshot.len() {
                let target_url = snapshot[target].url.clone();
                let session = DragSession::begin(snapshot.clone(), dragged).expect("begin");
                let outcome = session.finish(Some(target_url.as_str()), None).expect("finish");
                if let Some(list) = outcome.list() {
                    assert_eq!(leaf_count(list), before, "drag {dragged} onto {target}");
                }
            }
        }
    }

    #[test]
    fn begin_rejects_stale_index() {
        assert!(matches!(
            DragSession::begin(vec![item("A")], 2),
            Err(DockError::InvalidTarget(_))
        ));
    }
}

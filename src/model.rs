use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{DockError, Result};

/// One pinned dock entry. Groups carry `collapsed` and `children`; plain
/// items leave both absent so the persisted JSON matches what other tooling
/// writes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppItem {
    #[serde(default)]
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub favicon: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_group: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collapsed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<AppItem>>,
}

pub type AppList = Vec<AppItem>;

fn is_false(value: &bool) -> bool {
    !*value
}

impl AppItem {
    pub fn new(title: impl Into<String>, url: impl Into<String>, favicon: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            favicon: favicon.into(),
            ..Self::default()
        }
    }

    pub fn group(
        title: impl Into<String>,
        url: impl Into<String>,
        favicon: impl Into<String>,
        children: Vec<AppItem>,
    ) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            favicon: favicon.into(),
            is_group: true,
            collapsed: Some(false),
            children: Some(children),
        }
    }

    pub fn children(&self) -> &[AppItem] {
        match (&self.children, self.is_group) {
            (Some(children), true) => children,
            _ => &[],
        }
    }

    pub fn is_collapsed(&self) -> bool {
        self.is_group && self.collapsed.unwrap_or(false)
    }

    /// Drops every group field, leaving a plain item.
    pub fn into_plain(mut self) -> Self {
        self.is_group = false;
        self.collapsed = None;
        self.children = None;
        self
    }

    /// Number of launchable entries this item stands for.
    pub fn leaf_count(&self) -> usize {
        if self.is_group {
            self.children().len()
        } else {
            1
        }
    }

    pub fn domain(&self) -> Option<String> {
        domain_of(&self.url)
    }
}

/// Where an entry sits in the two-level list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum Location {
    Top { index: usize },
    Child { group: usize, child: usize },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AddOutcome {
    Inserted(usize),
    /// The url is already pinned; the caller highlights it instead.
    Existing(Location),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemEdit {
    pub title: Option<String>,
    pub url: Option<String>,
    pub favicon: Option<String>,
}

pub fn is_http_or_https_url(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}

/// Trims user input, assumes `https://` when no scheme is given and rejects
/// anything that is not http(s).
pub fn normalize_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(DockError::InvalidUrl("url cannot be empty".to_string()));
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };
    let parsed = Url::parse(&candidate)
        .map_err(|err| DockError::InvalidUrl(format!("{}: {}", trimmed, err)))?;
    if !is_http_or_https_url(&parsed) {
        return Err(DockError::InvalidUrl(format!(
            "only http:// and https:// URLs are supported: {}",
            trimmed
        )));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(DockError::InvalidUrl(format!("url has no host: {}", trimmed)));
    }
    Ok(parsed)
}

pub fn domain_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()?
        .host_str()
        .filter(|host| !host.is_empty())
        .map(str::to_ascii_lowercase)
}

pub fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Enforces the two-level shape: nested groups are spliced into their parent
/// and groups left without children become plain items.
pub fn normalize_list(list: AppList) -> AppList {
    list.into_iter().map(normalize_item).collect()
}

fn normalize_item(item: AppItem) -> AppItem {
    if !item.is_group {
        return item.into_plain();
    }

    let collapsed = item.collapsed.unwrap_or(false);
    let mut flattened = Vec::new();
    for child in item.children.clone().unwrap_or_default() {
        if child.is_group {
            let nested = child.children.clone().unwrap_or_default();
            if nested.is_empty() {
                flattened.push(child.into_plain());
            } else {
                flattened.extend(nested.into_iter().map(AppItem::into_plain));
            }
        } else {
            flattened.push(child.into_plain());
        }
    }

    if flattened.is_empty() {
        return item.into_plain();
    }
    AppItem {
        collapsed: Some(collapsed),
        children: Some(flattened),
        ..item
    }
}

pub fn leaf_count(list: &[AppItem]) -> usize {
    list.iter().map(AppItem::leaf_count).sum()
}

pub fn find_url(list: &[AppItem], url: &str) -> Option<Location> {
    for (index, item) in list.iter().enumerate() {
        if item.url == url && !item.is_group {
            return Some(Location::Top { index });
        }
        if let Some(child) = item.children().iter().position(|child| child.url == url) {
            return Some(Location::Child { group: index, child });
        }
    }
    None
}

pub fn item_at<'a>(list: &'a [AppItem], location: Location) -> Option<&'a AppItem> {
    match location {
        Location::Top { index } => list.get(index),
        Location::Child { group, child } => list.get(group)?.children().get(child),
    }
}

fn item_at_mut(list: &mut [AppItem], location: Location) -> Option<&mut AppItem> {
    match location {
        Location::Top { index } => list.get_mut(index),
        Location::Child { group, child } => {
            let group = list.get_mut(group).filter(|item| item.is_group)?;
            group.children.as_mut()?.get_mut(child)
        }
    }
}

/// Appends `item` unless its url is already pinned anywhere in the list.
pub fn add_item(list: &mut AppList, item: AppItem) -> AddOutcome {
    if let Some(existing) = find_url(list, &item.url) {
        return AddOutcome::Existing(existing);
    }
    list.push(item.into_plain());
    AddOutcome::Inserted(list.len() - 1)
}

pub fn edit_item(list: &mut AppList, location: Location, edit: ItemEdit) -> Result<()> {
    let item = item_at_mut(list, location)
        .ok_or_else(|| DockError::InvalidTarget(format!("no item at {:?}", location)))?;
    if let Some(title) = edit.title {
        item.title = collapse_whitespace(&title);
    }
    if let Some(url) = edit.url {
        item.url = normalize_url(&url)?.to_string();
    }
    if let Some(favicon) = edit.favicon {
        item.favicon = favicon;
    }
    Ok(())
}

pub fn delete_item(list: &mut AppList, location: Location) -> Result<AppItem> {
    match location {
        Location::Top { index } => {
            if index >= list.len() {
                return Err(DockError::InvalidTarget(format!("no item at index {}", index)));
            }
            Ok(list.remove(index))
        }
        Location::Child { group, child } => {
            let removed = take_child(list, group, child)?;
            demote_if_empty(list, group);
            Ok(removed)
        }
    }
}

/// Replaces the group at `index` with its children, in order, at the same
/// position.
pub fn ungroup(list: &mut AppList, index: usize) -> Result<()> {
    match list.get(index) {
        Some(item) if item.is_group => {}
        Some(_) => {
            return Err(DockError::InvalidTarget(format!(
                "item at index {} is not a group",
                index
            )))
        }
        None => return Err(DockError::InvalidTarget(format!("no item at index {}", index))),
    }
    let group = list.remove(index);
    let children: Vec<AppItem> = group
        .children
        .unwrap_or_default()
        .into_iter()
        .map(AppItem::into_plain)
        .collect();
    list.splice(index..index, children);
    Ok(())
}

/// Moves a child out of its group to the top level, directly after the
/// group.
pub fn remove_from_group(list: &mut AppList, group: usize, child: usize) -> Result<usize> {
    let removed = take_child(list, group, child)?;
    let insert_at = (group + 1).min(list.len());
    list.insert(insert_at, removed.into_plain());
    demote_if_empty(list, group);
    Ok(insert_at)
}

pub fn toggle_collapsed(list: &mut AppList, index: usize) -> Result<bool> {
    let item = list
        .get_mut(index)
        .filter(|item| item.is_group)
        .ok_or_else(|| DockError::InvalidTarget(format!("no group at index {}", index)))?;
    let next = !item.collapsed.unwrap_or(false);
    item.collapsed = Some(next);
    Ok(next)
}

fn take_child(list: &mut AppList, group: usize, child: usize) -> Result<AppItem> {
    let children = list
        .get_mut(group)
        .filter(|item| item.is_group)
        .and_then(|item| item.children.as_mut())
        .ok_or_else(|| DockError::InvalidTarget(format!("no group at index {}", group)))?;
    if child >= children.len() {
        return Err(DockError::InvalidTarget(format!(
            "group {} has no child {}",
            group, child
        )));
    }
    Ok(children.remove(child))
}

fn demote_if_empty(list: &mut AppList, group: usize) {
    if let Some(item) = list.get_mut(group) {
        if item.is_group && item.children().is_empty() {
            *item = std::mem::take(item).into_plain();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(name: &str) -> AppItem {
        AppItem::new(name, format!("https://{}.example/", name.to_lowercase()), "")
    }

    #[test]
    fn plain_item_serializes_without_group_fields() {
        let value = serde_json::to_value(item("A")).expect("serialize");
        assert_eq!(
            value,
            json!({ "title": "A", "url": "https://a.example/", "favicon": "" })
        );
    }

    #[test]
    fn group_uses_camel_case_fields() {
        let group = AppItem::group("Group B", "https://b.example/", "", vec![item("B"), item("A")]);
        let value = serde_json::to_value(&group).expect("serialize");
        assert_eq!(value["isGroup"], json!(true));
        assert_eq!(value["collapsed"], json!(false));
        assert_eq!(value["children"].as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn empty_group_normalizes_to_plain_item() {
        let list = vec![AppItem::group("G", "https://g.example/", "", Vec::new())];
        let normalized = normalize_list(list);
        assert_eq!(normalized, vec![AppItem::new("G", "https://g.example/", "")]);
    }

    #[test]
    fn nested_groups_are_flattened_into_parent() {
        let inner = AppItem::group("Inner", "https://x.example/", "", vec![item("X"), item("Y")]);
        let outer = AppItem::group("Outer", "https://z.example/", "", vec![item("Z"), inner]);
        let normalized = normalize_list(vec![outer]);
        let urls: Vec<&str> = normalized[0].children().iter().map(|c| c.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://z.example/", "https://x.example/", "https://y.example/"]
        );
        assert!(normalized[0].children().iter().all(|c| !c.is_group));
    }

    #[test]
    fn normalize_url_adds_scheme_and_rejects_others() {
        assert_eq!(
            normalize_url("  example.com/path ").expect("url").as_str(),
            "https://example.com/path"
        );
        assert!(normalize_url("ftp://example.com").is_err());
        assert!(normalize_url("   ").is_err());
    }

    #[test]
    fn add_item_reports_existing_child_url() {
        let mut list = vec![AppItem::group("G", "https://g.example/", "", vec![item("X")])];
        let outcome = add_item(&mut list, item("X"));
        assert_eq!(outcome, AddOutcome::Existing(Location::Child { group: 0, child: 0 }));
        assert_eq!(list.len(), 1);

        assert_eq!(add_item(&mut list, item("Y")), AddOutcome::Inserted(1));
    }

    #[test]
    fn ungroup_preserves_url_multiset_at_group_position() {
        let mut list = vec![
            item("A"),
            AppItem::group("G", "https://x.example/", "", vec![item("X"), item("Y")]),
            item("B"),
        ];
        let before = leaf_count(&list);
        ungroup(&mut list, 1).expect("ungroup");
        let urls: Vec<&str> = list.iter().map(|i| i.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://a.example/",
                "https://x.example/",
                "https://y.example/",
                "https://b.example/"
            ]
        );
        assert_eq!(leaf_count(&list), before);
    }

    #[test]
    fn ungroup_on_plain_item_is_rejected_without_mutation() {
        let mut list = vec![item("A")];
        assert!(matches!(ungroup(&mut list, 0), Err(DockError::InvalidTarget(_))));
        assert!(matches!(ungroup(&mut list, 4), Err(DockError::InvalidTarget(_))));
        assert_eq!(list, vec![item("A")]);
    }

    #[test]
    fn removing_last_child_demotes_group() {
        let mut list = vec![AppItem::group("G", "https://g.example/", "", vec![item("X")])];
        let at = remove_from_group(&mut list, 0, 0).expect("remove");
        assert_eq!(at, 1);
        assert_eq!(list[0], AppItem::new("G", "https://g.example/", ""));
        assert_eq!(list[1], item("X"));
    }

    #[test]
    fn delete_with_stale_index_is_rejected() {
        let mut list = vec![item("A")];
        assert!(delete_item(&mut list, Location::Top { index: 3 }).is_err());
        assert!(delete_item(&mut list, Location::Child { group: 0, child: 0 }).is_err());
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn edit_item_normalizes_url_and_title() {
        let mut list = vec![item("A")];
        edit_item(
            &mut list,
            Location::Top { index: 0 },
            ItemEdit {
                title: Some("  New   name ".to_string()),
                url: Some("new.example".to_string()),
                favicon: None,
            },
        )
        .expect("edit");
        assert_eq!(list[0].title, "New name");
        assert_eq!(list[0].url, "https://new.example/");
    }

    #[test]
    fn toggle_collapsed_flips_group_state() {
        let mut list = vec![AppItem::group("G", "https://g.example/", "", vec![item("X")])];
        assert_eq!(toggle_collapsed(&mut list, 0).expect("toggle"), true);
        assert!(list[0].is_collapsed());
        assert_eq!(toggle_collapsed(&mut list, 0).expect("toggle"), false);
    }
}

use anyhow::{anyhow, Context, Result};
use log::{debug, warn};
use serde::Deserialize;
use serde_yaml::Value;
use std::{collections::BTreeSet as Set, fs, path::Path};

use crate::menu::MenuItem;

#[derive(Debug, Deserialize)]
struct RawItem {
    id: String,
    text: String,
    answer: Option<String>,
    #[serde(default)]
    children: Vec<RawItem>,
}

#[derive(Debug, Deserialize)]
struct MenuBlock {
    menu: Vec<RawItem>,
}

/// The menu tree read from `menu.yaml`.
///
/// The file either holds a single `menu:` list or one block per language
/// (`en: { menu: [...] }`). In the latter case the default language is used,
/// falling back to the first block in the file.
#[derive(Clone, Debug)]
pub struct MenuLoader {
    roots: Vec<MenuItem>,
    language: Option<String>,
}

impl MenuLoader {
    pub fn from_path<P: AsRef<Path>>(path: P, default_lang: &str) -> Result<MenuLoader> {
        let path = path.as_ref();
        let yaml = fs::read_to_string(path)
            .with_context(|| format!("could not read menu {:?}", path))?;

        MenuLoader::from_yaml(&yaml, default_lang)
            .with_context(|| format!("could not load menu {:?}", path))
    }

    pub fn from_yaml(yaml: &str, default_lang: &str) -> Result<MenuLoader> {
        let raw: Value = serde_yaml::from_str(yaml)?;
        let mapping = raw
            .as_mapping()
            .ok_or_else(|| anyhow!("expected a mapping at the top level"))?;

        let (language, block) = if mapping.contains_key(&Value::from("menu")) {
            (None, raw.clone())
        } else {
            let (language, block) = match mapping.get(&Value::from(default_lang)) {
                Some(block) => (default_lang.to_owned(), block.clone()),
                None => {
                    let (language, block) = mapping
                        .iter()
                        .next()
                        .ok_or_else(|| anyhow!("the menu file has no language blocks"))?;
                    let language = language
                        .as_str()
                        .ok_or_else(|| anyhow!("language keys must be strings"))?
                        .to_owned();
                    warn!(
                        "no menu for language {:?}, falling back to {:?}",
                        default_lang, language
                    );
                    (language, block.clone())
                }
            };
            (Some(language), block)
        };

        let block: MenuBlock = serde_yaml::from_value(block)?;
        let roots = block
            .menu
            .into_iter()
            .map(parse_item)
            .collect::<Result<Vec<_>>>()?;
        check_siblings("<root>", &roots);

        debug!(
            "loaded {} root menu items (language {:?})",
            roots.len(),
            language
        );

        Ok(MenuLoader { roots, language })
    }

    pub fn roots(&self) -> &[MenuItem] {
        &self.roots
    }

    /// The language block that was picked, `None` for single-language files.
    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    pub fn find_by_path<S: AsRef<str>>(&self, path: &[S]) -> Option<&MenuItem> {
        let (head, tail) = path.split_first()?;

        self.roots
            .iter()
            .find(|root| root.id == head.as_ref())
            .and_then(|root| root.find(tail))
    }

    /// The trimmed texts of every item along `path`, joined with " / ".
    pub fn breadcrumb<S: AsRef<str>>(&self, path: &[S]) -> String {
        (1..=path.len())
            .map_while(|depth| self.find_by_path(&path[..depth]))
            .map(|item| item.text.trim())
            .collect::<Vec<_>>()
            .join(" / ")
    }

    pub fn leaves(&self) -> impl Iterator<Item = &MenuItem> {
        self.roots.iter().flat_map(|root| root.leaves())
    }
}

fn parse_item(raw: RawItem) -> Result<MenuItem> {
    if raw.id.is_empty() || raw.id.contains(':') {
        return Err(anyhow!(
            "menu id {:?} must be non-empty and must not contain ':'",
            raw.id
        ));
    }

    let children = raw
        .children
        .into_iter()
        .map(parse_item)
        .collect::<Result<Vec<_>>>()?;
    check_siblings(&raw.id, &children);

    Ok(MenuItem {
        id: raw.id,
        text: raw.text,
        answer: raw.answer,
        children,
    })
}

fn check_siblings(parent: &str, items: &[MenuItem]) {
    let mut seen = Set::new();
    for item in items {
        if !seen.insert(item.id.as_str()) {
            warn!(
                "duplicate menu id {:?} under {:?}, only the first one is reachable",
                item.id, parent
            );
        }
    }
}

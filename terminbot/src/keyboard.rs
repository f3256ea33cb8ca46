use log::warn;

use crate::{
    menu::MenuItem,
    telegram::{InlineKeyboardButton, InlineKeyboardMarkup},
};

pub const ROOT_CALLBACK: &str = "ROOT";
pub const PATH_SEPARATOR: &str = ":";
pub const NOTIFY_TEXT: &str = "🔔 Notify Me (Join)";
pub const BACK_TEXT: &str = "⬅️ Back";

/// Telegram rejects callback data longer than this many bytes.
const MAX_CALLBACK_DATA: usize = 64;

pub struct KeyboardFactory {
    channel: Option<String>,
}

impl KeyboardFactory {
    pub fn new(channel: Option<String>) -> KeyboardFactory {
        KeyboardFactory {
            channel: channel.filter(|channel| !channel.trim_start_matches('@').is_empty()),
        }
    }

    /// One button per item, each carrying the path to that item. The root
    /// keyboard gets the channel button, every other keyboard a Back button.
    pub fn make_keyboard<S: AsRef<str>>(
        &self,
        parent_path: &[S],
        items: &[MenuItem],
    ) -> InlineKeyboardMarkup {
        let mut keyboard = InlineKeyboardMarkup::default();

        for item in items {
            let data = join_path(
                parent_path
                    .iter()
                    .map(|id| id.as_ref())
                    .chain(Some(item.id.as_str())),
            );
            if data.len() > MAX_CALLBACK_DATA {
                warn!(
                    "callback data {:?} is longer than {} bytes, Telegram will reject it",
                    data, MAX_CALLBACK_DATA
                );
            }
            keyboard = keyboard.row(InlineKeyboardButton::callback(item.text.as_str(), data));
        }

        match (parent_path.split_last(), &self.channel) {
            (None, Some(channel)) => {
                let url = format!("https://t.me/{}", channel.trim_start_matches('@'));
                keyboard = keyboard.row(InlineKeyboardButton::url(NOTIFY_TEXT, url));
            }
            (None, None) => {}
            (Some((_, parent)), _) => {
                let back = if parent.is_empty() {
                    ROOT_CALLBACK.to_owned()
                } else {
                    join_path(parent.iter().map(|id| id.as_ref()))
                };
                keyboard = keyboard.row(InlineKeyboardButton::callback(BACK_TEXT, back));
            }
        }

        keyboard
    }
}

fn join_path<'a, I: Iterator<Item = &'a str>>(ids: I) -> String {
    ids.collect::<Vec<_>>().join(PATH_SEPARATOR)
}

/// Inverse of the callback data built by [`KeyboardFactory::make_keyboard`].
pub fn parse_callback_data(data: &str) -> Vec<&str> {
    if data.is_empty() || data == ROOT_CALLBACK {
        Vec::new()
    } else {
        data.split(PATH_SEPARATOR).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(ids: &[&str]) -> Vec<MenuItem> {
        ids.iter()
            .map(|id| MenuItem {
                id: (*id).into(),
                text: id.to_uppercase(),
                answer: None,
                children: vec![],
            })
            .collect()
    }

    fn summary(keyboard: &InlineKeyboardMarkup) -> Vec<(String, String)> {
        keyboard
            .buttons()
            .map(|button| {
                let target = button
                    .callback_data
                    .clone()
                    .or_else(|| button.url.clone())
                    .unwrap();
                (button.text.clone(), target)
            })
            .collect()
    }

    #[test]
    fn root_keyboard_has_the_channel_button() {
        let factory = KeyboardFactory::new(Some("@TerminJetztHeilbronn".into()));
        let keyboard = factory.make_keyboard::<&str>(&[], &items(&["times", "docs"]));

        assert_eq!(
            summary(&keyboard),
            vec![
                ("TIMES".to_owned(), "times".to_owned()),
                ("DOCS".to_owned(), "docs".to_owned()),
                (
                    NOTIFY_TEXT.to_owned(),
                    "https://t.me/TerminJetztHeilbronn".to_owned()
                ),
            ]
        );
        assert!(keyboard.inline_keyboard.iter().all(|row| row.len() == 1));
    }

    #[test]
    fn root_keyboard_without_channel_has_only_items() {
        let factory = KeyboardFactory::new(None);
        let keyboard = factory.make_keyboard::<&str>(&[], &items(&["times"]));

        assert_eq!(summary(&keyboard), vec![("TIMES".to_owned(), "times".to_owned())]);

        let blank = KeyboardFactory::new(Some("@".into()));
        assert_eq!(blank.make_keyboard::<&str>(&[], &[]).inline_keyboard.len(), 0);
    }

    #[test]
    fn submenus_carry_full_paths_and_a_back_button() {
        let factory = KeyboardFactory::new(Some("@chan".into()));

        let keyboard = factory.make_keyboard(&["docs"], &items(&["passport", "fee"]));
        assert_eq!(
            summary(&keyboard),
            vec![
                ("PASSPORT".to_owned(), "docs:passport".to_owned()),
                ("FEE".to_owned(), "docs:fee".to_owned()),
                (BACK_TEXT.to_owned(), ROOT_CALLBACK.to_owned()),
            ]
        );

        let keyboard = factory.make_keyboard(&["docs", "forms"], &[]);
        assert_eq!(
            summary(&keyboard),
            vec![(BACK_TEXT.to_owned(), "docs".to_owned())]
        );
    }

    #[test]
    fn callback_data_round_trips_to_paths() {
        assert!(parse_callback_data(ROOT_CALLBACK).is_empty());
        assert!(parse_callback_data("").is_empty());
        assert_eq!(parse_callback_data("docs:fee"), vec!["docs", "fee"]);
    }
}

use anyhow::Result;
use log::{debug, error, info, warn};
use std::{
    collections::{HashMap, VecDeque},
    thread,
    time::Duration,
};

use crate::{
    keyboard::{parse_callback_data, KeyboardFactory},
    loader::MenuLoader,
    menu::MenuItem,
    telegram::{BotApi, CallbackQuery, Message, Update},
};

pub const WELCOME_TEXT: &str = "<b>Welcome to TerminJetzt Heilbronn!\n</b>\
    Use the buttons below to explore appointment info, docs, and FAQs.";
pub const NOT_UNDERSTOOD_TEXT: &str =
    "Sorry, I didn't understand that. Please use the menu below.";

const FAQ_CACHE_SIZE: usize = 128;
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Least recently used answers to free-text questions.
struct FaqCache {
    answers: HashMap<String, Option<String>>,
    order: VecDeque<String>,
}

impl FaqCache {
    fn new() -> FaqCache {
        FaqCache {
            answers: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get_or_insert_with<F>(&mut self, question: &str, search: F) -> Option<String>
    where
        F: FnOnce() -> Option<String>,
    {
        if let Some(answer) = self.answers.get(question) {
            let answer = answer.clone();
            if let Some(position) = self.order.iter().position(|q| q == question) {
                if let Some(key) = self.order.remove(position) {
                    self.order.push_back(key);
                }
            }
            return answer;
        }

        let answer = search();
        if self.order.len() >= FAQ_CACHE_SIZE {
            if let Some(oldest) = self.order.pop_front() {
                self.answers.remove(&oldest);
            }
        }
        self.order.push_back(question.to_owned());
        self.answers.insert(question.to_owned(), answer.clone());
        answer
    }

    fn len(&self) -> usize {
        self.answers.len()
    }
}

/// The first leaf whose answer contains any word of `text`, ignoring case.
pub fn search_faq<'a>(menu: &'a MenuLoader, text: &str) -> Option<&'a str> {
    let text = text.to_lowercase();
    let words = text.split_whitespace().collect::<Vec<_>>();
    if words.is_empty() {
        return None;
    }

    menu.leaves()
        .filter_map(|leaf| leaf.answer.as_deref())
        .find(|answer| {
            let answer = answer.to_lowercase();
            words.iter().any(|word| answer.contains(word))
        })
}

fn is_start_command(text: &str) -> bool {
    let command = match text.split_whitespace().next() {
        Some(command) if command.starts_with('/') => &command[1..],
        _ => return false,
    };
    let command = command.split('@').next().unwrap_or(command);

    command == "start" || command == "help"
}

pub struct TerminBot {
    api: Box<dyn BotApi>,
    menu: MenuLoader,
    keyboards: KeyboardFactory,
    faq_cache: FaqCache,
    poll_timeout: u64,
}

impl TerminBot {
    pub fn new<A>(api: A, menu: MenuLoader, channel: Option<String>, poll_timeout: u64) -> TerminBot
    where
        A: 'static + BotApi,
    {
        TerminBot {
            api: Box::new(api),
            menu,
            keyboards: KeyboardFactory::new(channel),
            faq_cache: FaqCache::new(),
            poll_timeout,
        }
    }

    /// Polls forever. API failures are retried with a growing pause.
    pub fn run(&mut self) -> ! {
        info!("🤖 TerminJetzt bot polling started …");

        let mut offset = 0;
        let mut backoff = Duration::from_secs(1);
        loop {
            match self.poll_once(offset) {
                Ok(next_offset) => {
                    offset = next_offset;
                    backoff = Duration::from_secs(1);
                }
                Err(err) => {
                    error!("polling failed, retrying in {:?}: {:#}", backoff, err);
                    thread::sleep(backoff);
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }

    /// Fetches one batch of updates and handles them. Returns the offset
    /// for the next call.
    pub fn poll_once(&mut self, offset: i64) -> Result<i64> {
        let updates = self.api.get_updates(offset, self.poll_timeout)?;

        let mut next_offset = offset;
        for update in updates.iter() {
            next_offset = next_offset.max(update.update_id + 1);
            if let Err(err) = self.handle_update(update) {
                error!("failed to handle update {}: {:#}", update.update_id, err);
            }
        }

        Ok(next_offset)
    }

    pub fn handle_update(&mut self, update: &Update) -> Result<()> {
        if let Some(callback) = &update.callback_query {
            return self.on_callback(callback);
        }

        match &update.message {
            Some(message) => match message.text.as_deref() {
                Some(text) if is_start_command(text) => self.on_start(message),
                Some(text) => self.on_text(message, text),
                None => {
                    debug!("ignoring message {} without text", message.message_id);
                    Ok(())
                }
            },
            None => {
                debug!("ignoring update {}", update.update_id);
                Ok(())
            }
        }
    }

    fn root_items(&self) -> &[MenuItem] {
        self.menu.roots()
    }

    fn on_start(&mut self, message: &Message) -> Result<()> {
        let chat_id = message.chat.id;
        self.api.send_chat_action(chat_id, "typing")?;

        let keyboard = self.keyboards.make_keyboard::<&str>(&[], self.root_items());
        self.api.send_message(chat_id, WELCOME_TEXT, Some(&keyboard))
    }

    fn on_callback(&mut self, callback: &CallbackQuery) -> Result<()> {
        let data = callback.data.as_deref().unwrap_or("");
        debug!("callback {:?} from user {}", data, callback.from.id);

        let message = match &callback.message {
            Some(message) => message,
            None => {
                warn!("callback {} has no message to update", callback.id);
                return self.api.answer_callback_query(&callback.id);
            }
        };
        let (chat_id, message_id) = (message.chat.id, message.message_id);

        let path = parse_callback_data(data);
        let item = if path.is_empty() {
            None
        } else {
            self.menu.find_by_path(&path)
        };

        self.api.answer_callback_query(&callback.id)?;

        match item {
            None => {
                let keyboard = self.keyboards.make_keyboard::<&str>(&[], self.menu.roots());
                self.api
                    .edit_message_reply_markup(chat_id, message_id, &keyboard)
            }
            Some(item) => match (&item.answer, item.is_leaf()) {
                (Some(answer), true) if !answer.is_empty() => {
                    let text = format!("<b>{}</b>\n\n{}", self.menu.breadcrumb(&path), answer);
                    let keyboard = self.keyboards.make_keyboard(&path, &[]);
                    self.api
                        .edit_message_text(chat_id, message_id, &text, Some(&keyboard))
                }
                _ => {
                    let keyboard = self.keyboards.make_keyboard(&path, &item.children);
                    self.api
                        .edit_message_reply_markup(chat_id, message_id, &keyboard)
                }
            },
        }
    }

    fn on_text(&mut self, message: &Message, text: &str) -> Result<()> {
        let menu = &self.menu;
        let answer = self
            .faq_cache
            .get_or_insert_with(text, || search_faq(menu, text).map(str::to_owned));

        match answer {
            Some(answer) => self.api.reply_to(message, &answer),
            None => self.api.reply_to(message, NOT_UNDERSTOOD_TEXT),
        }
    }
}

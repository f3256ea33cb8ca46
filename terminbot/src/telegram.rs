use anyhow::{anyhow, Result};
use log::debug;
use reqwest::blocking::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

pub const PARSE_MODE: &str = "HTML";

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Chat {
    pub id: i64,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct User {
    pub id: i64,
    pub username: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    pub message: Option<Message>,
    pub data: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

impl InlineKeyboardMarkup {
    /// Adds `button` on a row of its own.
    pub fn row(mut self, button: InlineKeyboardButton) -> Self {
        self.inline_keyboard.push(vec![button]);
        self
    }

    pub fn buttons(&self) -> impl Iterator<Item = &InlineKeyboardButton> {
        self.inline_keyboard.iter().flatten()
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct InlineKeyboardButton {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl InlineKeyboardButton {
    pub fn callback<T: Into<String>, D: Into<String>>(text: T, data: D) -> Self {
        InlineKeyboardButton {
            text: text.into(),
            callback_data: Some(data.into()),
            url: None,
        }
    }

    pub fn url<T: Into<String>, U: Into<String>>(text: T, url: U) -> Self {
        InlineKeyboardButton {
            text: text.into(),
            callback_data: None,
            url: Some(url.into()),
        }
    }
}

/// The subset of the Bot API the bot talks to.
pub trait BotApi {
    fn get_updates(&mut self, offset: i64, timeout: u64) -> Result<Vec<Update>>;

    fn send_message(
        &mut self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&InlineKeyboardMarkup>,
    ) -> Result<()>;

    fn reply_to(&mut self, message: &Message, text: &str) -> Result<()>;

    fn send_chat_action(&mut self, chat_id: i64, action: &str) -> Result<()>;

    fn edit_message_text(
        &mut self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        keyboard: Option<&InlineKeyboardMarkup>,
    ) -> Result<()>;

    fn edit_message_reply_markup(
        &mut self,
        chat_id: i64,
        message_id: i64,
        keyboard: &InlineKeyboardMarkup,
    ) -> Result<()>;

    fn answer_callback_query(&mut self, callback_query_id: &str) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i64>,
}

/// Blocking Bot API client. Messages are sent with HTML parse mode.
pub struct TelegramClient {
    client: Client,
    base_url: String,
}

impl TelegramClient {
    pub fn new(api_url: &str, token: &str, poll_timeout: u64) -> Result<TelegramClient> {
        let client = Client::builder()
            .timeout(Duration::from_secs(poll_timeout.saturating_add(10)))
            .build()?;

        Ok(TelegramClient {
            client,
            base_url: format!("{}/bot{}", api_url.trim_end_matches('/'), token),
        })
    }

    fn call<T: DeserializeOwned>(&self, method: &str, payload: Value) -> Result<T> {
        debug!("calling {}", method);

        // Request errors carry the URL, which carries the token.
        let response = self
            .client
            .post(&format!("{}/{}", self.base_url, method))
            .json(&payload)
            .send()
            .map_err(|err| anyhow!("{} failed: {}", method, err.without_url()))?;

        let response: ApiResponse<T> = response
            .json()
            .map_err(|err| anyhow!("{} returned an unreadable response: {}", method, err.without_url()))?;

        into_result(method, response)
    }

    fn call_ignoring_unmodified(&self, method: &str, payload: Value) -> Result<()> {
        match self.call::<Value>(method, payload) {
            Err(err) if err.to_string().contains("message is not modified") => {
                debug!("{}: message is not modified", method);
                Ok(())
            }
            other => other.map(|_| ()),
        }
    }
}

fn into_result<T>(method: &str, response: ApiResponse<T>) -> Result<T> {
    match response {
        ApiResponse {
            ok: true,
            result: Some(result),
            ..
        } => Ok(result),
        ApiResponse {
            description,
            error_code,
            ..
        } => Err(anyhow!(
            "{} failed ({}): {}",
            method,
            error_code.map_or_else(|| "no code".to_owned(), |code| code.to_string()),
            description.unwrap_or_else(|| "no description".into())
        )),
    }
}

fn with_keyboard(mut payload: Value, keyboard: Option<&InlineKeyboardMarkup>) -> Value {
    if let Some(keyboard) = keyboard {
        payload["reply_markup"] = json!(keyboard);
    }
    payload
}

impl BotApi for TelegramClient {
    fn get_updates(&mut self, offset: i64, timeout: u64) -> Result<Vec<Update>> {
        self.call(
            "getUpdates",
            json!({
                "offset": offset,
                "timeout": timeout,
                "allowed_updates": ["message", "callback_query"],
            }),
        )
    }

    fn send_message(
        &mut self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&InlineKeyboardMarkup>,
    ) -> Result<()> {
        let payload = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": PARSE_MODE,
        });
        self.call::<Value>("sendMessage", with_keyboard(payload, keyboard))?;
        Ok(())
    }

    fn reply_to(&mut self, message: &Message, text: &str) -> Result<()> {
        self.call::<Value>(
            "sendMessage",
            json!({
                "chat_id": message.chat.id,
                "text": text,
                "parse_mode": PARSE_MODE,
                "reply_to_message_id": message.message_id,
            }),
        )?;
        Ok(())
    }

    fn send_chat_action(&mut self, chat_id: i64, action: &str) -> Result<()> {
        self.call::<Value>(
            "sendChatAction",
            json!({ "chat_id": chat_id, "action": action }),
        )?;
        Ok(())
    }

    fn edit_message_text(
        &mut self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        keyboard: Option<&InlineKeyboardMarkup>,
    ) -> Result<()> {
        let payload = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": text,
            "parse_mode": PARSE_MODE,
        });
        self.call_ignoring_unmodified("editMessageText", with_keyboard(payload, keyboard))
    }

    fn edit_message_reply_markup(
        &mut self,
        chat_id: i64,
        message_id: i64,
        keyboard: &InlineKeyboardMarkup,
    ) -> Result<()> {
        let payload = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "reply_markup": keyboard,
        });
        self.call_ignoring_unmodified("editMessageReplyMarkup", payload)
    }

    fn answer_callback_query(&mut self, callback_query_id: &str) -> Result<()> {
        self.call::<Value>(
            "answerCallbackQuery",
            json!({ "callback_query_id": callback_query_id }),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_updates() {
        let json = r#"{
            "ok": true,
            "result": [
                {
                    "update_id": 10,
                    "message": {
                        "message_id": 1,
                        "from": { "id": 7, "is_bot": false, "first_name": "Ana" },
                        "chat": { "id": 7, "type": "private" },
                        "date": 1722240000,
                        "text": "/start"
                    }
                },
                {
                    "update_id": 11,
                    "callback_query": {
                        "id": "cb1",
                        "from": { "id": 7, "is_bot": false, "first_name": "Ana", "username": "ana" },
                        "message": { "message_id": 2, "chat": { "id": 7, "type": "private" }, "date": 1 },
                        "chat_instance": "x",
                        "data": "docs:fee"
                    }
                }
            ]
        }"#;

        let response: ApiResponse<Vec<Update>> = serde_json::from_str(json).unwrap();
        let updates = into_result("getUpdates", response).unwrap();

        assert_eq!(updates.len(), 2);
        assert_eq!(
            updates[0].message.as_ref().and_then(|m| m.text.as_deref()),
            Some("/start")
        );
        let callback = updates[1].callback_query.as_ref().unwrap();
        assert_eq!(callback.data.as_deref(), Some("docs:fee"));
        assert_eq!(callback.from.username.as_deref(), Some("ana"));
        assert_eq!(callback.message.as_ref().map(|m| m.message_id), Some(2));
    }

    #[test]
    fn api_errors_carry_code_and_description() {
        let json = r#"{ "ok": false, "error_code": 401, "description": "Unauthorized" }"#;

        let response: ApiResponse<Vec<Update>> = serde_json::from_str(json).unwrap();
        let err = into_result("getUpdates", response).unwrap_err();

        assert_eq!(err.to_string(), "getUpdates failed (401): Unauthorized");
    }

    #[test]
    fn keyboards_serialize_like_the_bot_api() {
        let keyboard = InlineKeyboardMarkup::default()
            .row(InlineKeyboardButton::callback("Docs", "docs"))
            .row(InlineKeyboardButton::url("Join", "https://t.me/channel"));

        assert_eq!(
            serde_json::to_value(&keyboard).unwrap(),
            json!({
                "inline_keyboard": [
                    [{ "text": "Docs", "callback_data": "docs" }],
                    [{ "text": "Join", "url": "https://t.me/channel" }],
                ]
            })
        );

        let payload = with_keyboard(json!({ "chat_id": 1 }), Some(&keyboard));
        assert_eq!(payload["reply_markup"]["inline_keyboard"][0][0]["text"], "Docs");
        assert!(with_keyboard(json!({}), None).get("reply_markup").is_none());
    }
}

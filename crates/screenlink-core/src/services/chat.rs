//! ChatIn service: the plugin asks the host to list, select, write to and
//! clean up chats.

use crate::address::ConnectionAddress;
use crate::dispatch::{ClientCall, MethodKind, Responder, RpcMethod, ServiceClient, ServiceServer};
use crate::error::Result;
use crate::service::ServiceType;
use crate::status::{CallFailure, CallResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChatType {
    Machine,
    Session,
}

impl ChatType {
    pub fn to_wire(self) -> i32 {
        match self {
            ChatType::Machine => 0,
            ChatType::Session => 1,
        }
    }

    pub fn try_from_wire(value: i32) -> Option<Self> {
        match value {
            0 => Some(ChatType::Machine),
            1 => Some(ChatType::Session),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChatState {
    Open,
    Closed,
}

impl ChatState {
    pub fn to_wire(self) -> i32 {
        match self {
            ChatState::Open => 0,
            ChatState::Closed => 1,
        }
    }

    pub fn try_from_wire(value: i32) -> Option<Self> {
        match value {
            0 => Some(ChatState::Open),
            1 => Some(ChatState::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatInfo {
    pub chat_id: String,
    pub title: String,
    pub chat_type: ChatType,
    pub chat_type_id: u32,
    pub chat_state: ChatState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireChatInfo {
    pub chat_id: String,
    pub title: String,
    pub chat_type: i32,
    pub chat_type_id: u32,
    pub chat_state: i32,
}

impl From<ChatInfo> for WireChatInfo {
    fn from(info: ChatInfo) -> Self {
        Self {
            chat_id: info.chat_id,
            title: info.title,
            chat_type: info.chat_type.to_wire(),
            chat_type_id: info.chat_type_id,
            chat_state: info.chat_state.to_wire(),
        }
    }
}

impl WireChatInfo {
    /// Fails on a chat type or state this build does not know.
    pub fn into_chat_info(self) -> CallResult<ChatInfo> {
        let chat_type =
            ChatType::try_from_wire(self.chat_type).ok_or_else(CallFailure::invalid_response)?;
        let chat_state =
            ChatState::try_from_wire(self.chat_state).ok_or_else(CallFailure::invalid_response)?;
        Ok(ChatInfo {
            chat_id: self.chat_id,
            title: self.title,
            chat_type,
            chat_type_id: self.chat_type_id,
            chat_state,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObtainChatsResponse {
    #[serde(default)]
    pub chats: Vec<WireChatInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectChatRequest {
    pub chat_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub local_id: u32,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadMessagesRequest {
    pub count: u32,
    pub last_id: String,
}

macro_rules! chat_method {
    ($name:ident, $id:expr, $request:ty, $response:ty) => {
        pub struct $name;

        impl RpcMethod for $name {
            type Request = $request;
            type Response = $response;

            const KIND: MethodKind = MethodKind {
                service: ServiceType::ChatIn,
                name: stringify!($name),
                function_id: $id,
                requires_com_id: true,
            };
        }
    };
}

chat_method!(ObtainChats, 1, (), ObtainChatsResponse);
chat_method!(SelectChat, 2, SelectChatRequest, ());
chat_method!(SendMessage, 3, SendMessageRequest, ());
chat_method!(LoadMessages, 4, LoadMessagesRequest, ());
chat_method!(DeleteHistory, 5, (), ());
chat_method!(DeleteChat, 6, (), ());

pub const METHODS: &[MethodKind] = &[
    ObtainChats::KIND,
    SelectChat::KIND,
    SendMessage::KIND,
    LoadMessages::KIND,
    DeleteHistory::KIND,
    DeleteChat::KIND,
];

/// Client role of the ChatIn service.
pub struct ChatInClient {
    inner: ServiceClient,
}

impl Default for ChatInClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatInClient {
    pub fn new() -> Self {
        Self {
            inner: ServiceClient::new(ServiceType::ChatIn),
        }
    }

    pub fn start(&mut self, destination: &str) -> Result<()> {
        self.inner.start(destination)
    }

    pub fn stop(&mut self) {
        self.inner.stop()
    }

    pub fn is_started(&self) -> bool {
        self.inner.is_started()
    }

    pub async fn obtain_chats(&self, com_id: &str) -> CallResult<Vec<ChatInfo>> {
        let call = ClientCall::<ObtainChats>::new(()).translate(|response| {
            response
                .chats
                .into_iter()
                .map(WireChatInfo::into_chat_info)
                .collect::<CallResult<Vec<_>>>()
        });
        self.inner.invoke(com_id, call).await
    }

    pub async fn select_chat(&self, com_id: &str, chat_id: &str) -> CallResult<()> {
        let call = ClientCall::<SelectChat>::new(SelectChatRequest {
            chat_id: chat_id.to_string(),
        });
        self.inner.invoke(com_id, call).await
    }

    pub async fn send_message(&self, com_id: &str, local_id: u32, content: &str) -> CallResult<()> {
        let call = ClientCall::<SendMessage>::new(SendMessageRequest {
            local_id,
            content: content.to_string(),
        });
        self.inner.invoke(com_id, call).await
    }

    /// Ask for `count` messages before `last_id`. `count` must not be zero.
    pub async fn load_messages(&self, com_id: &str, count: u32, last_id: &str) -> CallResult<()> {
        let call = ClientCall::<LoadMessages>::new(LoadMessagesRequest {
            count,
            last_id: last_id.to_string(),
        })
        .validate(|request| request.count != 0);
        self.inner.invoke(com_id, call).await
    }

    pub async fn delete_history(&self, com_id: &str) -> CallResult<()> {
        self.inner
            .invoke(com_id, ClientCall::<DeleteHistory>::new(()))
            .await
    }

    pub async fn delete_chat(&self, com_id: &str) -> CallResult<()> {
        self.inner
            .invoke(com_id, ClientCall::<DeleteChat>::new(()))
            .await
    }
}

/// Server role of the ChatIn service.
pub struct ChatInServer {
    inner: ServiceServer,
}

impl Default for ChatInServer {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatInServer {
    pub fn new() -> Self {
        Self {
            inner: ServiceServer::new(ServiceType::ChatIn, METHODS),
        }
    }

    pub fn set_obtain_chats_callback<F>(&self, callback: F)
    where
        F: Fn(String, Responder<Vec<ChatInfo>>) + Send + Sync + 'static,
    {
        self.inner
            .set_callback::<ObtainChats, _>(move |com_id, (), responder| {
                callback(
                    com_id,
                    responder.map(|chats: Vec<ChatInfo>| ObtainChatsResponse {
                        chats: chats.into_iter().map(WireChatInfo::from).collect(),
                    }),
                )
            });
    }

    /// `callback(com_id, chat_id, responder)`.
    pub fn set_select_chat_callback<F>(&self, callback: F)
    where
        F: Fn(String, String, Responder<()>) + Send + Sync + 'static,
    {
        self.inner
            .set_callback::<SelectChat, _>(move |com_id, request, responder| {
                callback(com_id, request.chat_id, responder)
            });
    }

    /// `callback(com_id, local_id, content, responder)`.
    pub fn set_send_message_callback<F>(&self, callback: F)
    where
        F: Fn(String, u32, String, Responder<()>) + Send + Sync + 'static,
    {
        self.inner
            .set_callback::<SendMessage, _>(move |com_id, request, responder| {
                callback(com_id, request.local_id, request.content, responder)
            });
    }

    /// `callback(com_id, count, last_id, responder)`.
    pub fn set_load_messages_callback<F>(&self, callback: F)
    where
        F: Fn(String, u32, String, Responder<()>) + Send + Sync + 'static,
    {
        self.inner
            .set_callback::<LoadMessages, _>(move |com_id, request, responder| {
                callback(com_id, request.count, request.last_id, responder)
            });
    }

    pub fn set_delete_history_callback<F>(&self, callback: F)
    where
        F: Fn(String, Responder<()>) + Send + Sync + 'static,
    {
        self.inner
            .set_callback::<DeleteHistory, _>(move |com_id, (), responder| {
                callback(com_id, responder)
            });
    }

    pub fn set_delete_chat_callback<F>(&self, callback: F)
    where
        F: Fn(String, Responder<()>) + Send + Sync + 'static,
    {
        self.inner
            .set_callback::<DeleteChat, _>(move |com_id, (), responder| {
                callback(com_id, responder)
            });
    }

    pub async fn start(&mut self, location: &str) -> Result<ConnectionAddress> {
        self.inner.start(location).await
    }

    pub fn stop(&mut self) {
        self.inner.stop()
    }

    pub fn location(&self) -> Option<&ConnectionAddress> {
        self.inner.location()
    }

    pub fn service_server(&self) -> &ServiceServer {
        &self.inner
    }
}

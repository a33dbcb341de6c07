//! 세션 컨텍스트 - 호출자가 소유하는 세션별 대화 상태

use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::config::CONVERSATION_WINDOW_SIZE;

use super::window::{ConversationWindow, Turn};

/// 스트리밍 태스크와 공유되는 윈도우 핸들
pub(crate) type WindowHandle = Arc<Mutex<ConversationWindow>>;

/// 채팅 세션
///
/// 세션마다 하나씩 만들어 에이전트 호출에 넘깁니다. 세션 간에 윈도우를 공유하지 않습니다.
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    window: WindowHandle,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            window: new_window(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// 현재 대화 기록 스냅샷
    pub fn history(&self) -> Vec<Turn> {
        lock(&self.window).to_vec()
    }

    pub fn len(&self) -> usize {
        lock(&self.window).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.window).is_empty()
    }

    /// 대화 초기화
    ///
    /// 같은 용량의 빈 윈도우로 교체하고 새 세션 ID를 발급합니다.
    /// 진행 중인 스트림은 이전 윈도우에 기록되므로 새 대화에 섞이지 않습니다.
    pub fn reset(&mut self) {
        self.id = Uuid::new_v4();
        self.window = new_window();
        tracing::info!("Conversation reset (session {})", self.id);
    }

    pub(crate) fn window_handle(&self) -> WindowHandle {
        self.window.clone()
    }
}

/// 질문/답변 한 쌍 기록
///
/// 빈 답변은 다음 요청에서 빈 assistant 턴이 되므로 기록하지 않습니다.
pub(crate) fn record_exchange(window: &WindowHandle, query: &str, answer: &str) {
    if answer.trim().is_empty() {
        tracing::warn!("Empty answer; turn not recorded");
        return;
    }

    let mut window = lock(window);
    window.push(Turn::user(query));
    window.push(Turn::assistant(answer));
}

fn new_window() -> WindowHandle {
    Arc::new(Mutex::new(ConversationWindow::new(CONVERSATION_WINDOW_SIZE)))
}

fn lock(window: &WindowHandle) -> std::sync::MutexGuard<'_, ConversationWindow> {
    window.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

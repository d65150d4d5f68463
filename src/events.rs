//! 事件回调：消息到达、用户上线、用户下线
//!
//! 回调列表只增不减；触发时先快照列表再逐个派发到独立任务，
//! 不持有任何核心锁。回调的返回值不被消费，失败自行处理。

use std::sync::{Arc, RwLock};

use crate::model::message::Message;

/// 消息回调
pub type MessageHandler = Arc<dyn Fn(&Message) + Send + Sync>;
/// 用户上下线回调
pub type UserHandler = Arc<dyn Fn(i64) + Send + Sync>;

/// 事件回调注册表
#[derive(Default)]
pub struct EventHooks {
    on_message: RwLock<Vec<MessageHandler>>,
    on_user_online: RwLock<Vec<UserHandler>>,
    on_user_offline: RwLock<Vec<UserHandler>>,
}

impl EventHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册消息回调
    pub fn on_message(&self, handler: MessageHandler) {
        self.on_message.write().unwrap().push(handler);
    }

    /// 注册用户上线回调
    pub fn on_user_online(&self, handler: UserHandler) {
        self.on_user_online.write().unwrap().push(handler);
    }

    /// 注册用户下线回调
    pub fn on_user_offline(&self, handler: UserHandler) {
        self.on_user_offline.write().unwrap().push(handler);
    }

    /// 触发消息回调
    pub fn fire_message(&self, msg: &Message) {
        let handlers = self.on_message.read().unwrap().clone();
        if handlers.is_empty() {
            return;
        }
        let msg = Arc::new(msg.clone());
        for handler in handlers {
            let msg = msg.clone();
            tokio::spawn(async move {
                handler(&msg);
            });
        }
    }

    /// 触发用户上线回调
    pub fn fire_user_online(&self, user_id: i64) {
        for handler in self.on_user_online.read().unwrap().clone() {
            tokio::spawn(async move {
                handler(user_id);
            });
        }
    }

    /// 触发用户下线回调
    pub fn fire_user_offline(&self, user_id: i64) {
        for handler in self.on_user_offline.read().unwrap().clone() {
            tokio::spawn(async move {
                handler(user_id);
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn fires_all_registered_handlers() {
        let hooks = EventHooks::new();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let counter = counter.clone();
            hooks.on_user_online(Arc::new(move |user_id| {
                assert_eq!(user_id, 42);
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }

        hooks.fire_user_online(42);

        // 回调在独立任务中执行
        for _ in 0..50 {
            if counter.load(Ordering::SeqCst) == 3 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn message_hook_receives_message() {
        let hooks = EventHooks::new();
        let (tx, mut rx) = tokio::sync::mpsc::channel(1);

        hooks.on_message(Arc::new(move |msg: &Message| {
            let _ = tx.try_send(msg.msg_id.clone());
        }));

        let msg = Message {
            msg_id: "m-hook".to_string(),
            ..Default::default()
        };
        hooks.fire_message(&msg);

        assert_eq!(rx.recv().await.unwrap(), "m-hook");
    }
}

//! 进程级句柄表。
//!
//! 句柄是非负整数，槽位在关闭后复用。`dup` 产生共享同一对象的第二个
//! 句柄（独立引用计数），`close` 不可失败并在移除表项后于锁外释放对象，
//! 使层对象的析构可以递归关闭自己持有的下层句柄而不会死锁。

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::context::CallContext;
use crate::contract::SockObject;
use crate::error::{Result, bad_handle, not_supported};

/// 不透明的句柄标识。
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Handle(usize);

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h{}", self.0)
    }
}

#[derive(Default)]
struct Table {
    entries: Vec<Option<Arc<dyn SockObject>>>,
    free: Vec<usize>,
}

static TABLE: Mutex<Table> = Mutex::new(Table { entries: Vec::new(), free: Vec::new() });

/// 注册一个套接字对象，返回新句柄。
pub fn register(obj: Arc<dyn SockObject>) -> Handle {
    let kind = obj.kind();
    let mut table = TABLE.lock();
    let slot = match table.free.pop() {
        Some(slot) => {
            table.entries[slot] = Some(obj);
            slot
        }
        None => {
            table.entries.push(Some(obj));
            table.entries.len() - 1
        }
    };
    drop(table);
    let h = Handle(slot);
    debug!(target: "braid::handle", handle = %h, kind, "register");
    h
}

/// 多态分发原语：取出句柄背后的对象。
pub fn object(h: Handle, op: &'static str) -> Result<Arc<dyn SockObject>> {
    let table = TABLE.lock();
    table
        .entries
        .get(h.0)
        .and_then(|slot| slot.as_ref())
        .cloned()
        .ok_or_else(|| bad_handle(op))
}

/// 向下转型到某个层的私有控制接口。
///
/// 类型不匹配报 `NotSupported`——这等价于用错误的类型标签做能力查询。
pub fn control<T: SockObject>(h: Handle, op: &'static str) -> Result<Arc<T>> {
    let obj = object(h, op)?;
    let any: Arc<dyn Any + Send + Sync> = obj;
    any.downcast::<T>().map_err(|_| not_supported(op))
}

/// 复制句柄：同一对象上的第二个独立引用。
pub fn dup(h: Handle) -> Result<Handle> {
    let obj = object(h, "handle.dup")?;
    Ok(register(obj))
}

/// 半关闭：转发给对象的 `done` 钩子。
pub async fn done(h: Handle, ctx: &CallContext) -> Result<()> {
    let obj = object(h, "handle.done")?;
    obj.done(ctx).await
}

/// 无条件关闭：移除表项，最后一个引用消失时对象析构并递归回收子资源。
/// 不可失败；关闭未知句柄是空操作。
pub fn close(h: Handle) {
    let obj = {
        let mut table = TABLE.lock();
        match table.entries.get_mut(h.0) {
            Some(slot @ Some(_)) => {
                let obj = slot.take();
                table.free.push(h.0);
                obj
            }
            _ => None,
        }
    };
    if let Some(obj) = obj {
        debug!(target: "braid::handle", handle = %h, kind = obj.kind(), "close");
        // 析构发生在锁外：层对象可在 Drop 中递归关闭下层句柄。
        drop(obj);
    }
}

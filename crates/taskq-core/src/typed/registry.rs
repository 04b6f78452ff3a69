//! TaskRegistry - kind ごとのデコーダの登録と管理
//!
//! # 学習ポイント
//! - ジェネリック関数を関数ポインタとして保持する型消去
//! - Generic methods での登録と型安全性

use std::collections::HashMap;

use super::codec::CodecError;
use super::task::{Task, TypedTask};

/// Restores a boxed task from its stored payload.
pub type DecodeFn = fn(&[u8]) -> Result<Box<dyn Task>, CodecError>;

fn decode_typed<T: TypedTask>(bytes: &[u8]) -> Result<Box<dyn Task>, CodecError> {
    let task: T = serde_json::from_slice(bytes)?;
    Ok(Box::new(task))
}

/// TaskRegistry は kind → デコーダ の対応表
///
/// # 使用例
/// ```ignore
/// let mut registry = TaskRegistry::new();
/// registry.register::<Echo>()?;
///
/// let task = registry.decode("demo.echo.v1", &bytes)?;
/// ```
#[derive(Default)]
pub struct TaskRegistry {
    decoders: HashMap<String, DecodeFn>,
}

/// RegistryError は TaskRegistry の操作エラー
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Task kind '{0}' is already registered")]
    AlreadyRegistered(String),
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: TypedTask>(&mut self) -> Result<(), RegistryError> {
        let kind = T::KIND.to_string();
        if self.decoders.contains_key(&kind) {
            return Err(RegistryError::AlreadyRegistered(kind));
        }
        self.decoders.insert(kind, decode_typed::<T>);
        Ok(())
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.decoders.contains_key(kind)
    }

    pub fn decode(&self, kind: &str, bytes: &[u8]) -> Result<Box<dyn Task>, CodecError> {
        let decode = self
            .decoders
            .get(kind)
            .ok_or_else(|| CodecError::UnknownKind(kind.to_string()))?;
        decode(bytes)
    }

    pub fn registered_kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.decoders.keys().cloned().collect();
        kinds.sort();
        kinds
    }
}


#[cfg(test)]
mod tests {
    use super::test_tasks::{CountTask, LabelTask};
    use super::*;

    #[test]
    fn register_and_decode() {
        let mut registry = TaskRegistry::new();
        registry.register::<CountTask>().unwrap();

        let bytes = serde_json::to_vec(&CountTask { value: 3 }).unwrap();
        let task = registry.decode(CountTask::KIND, &bytes).unwrap();
        assert_eq!(task.kind(), CountTask::KIND);
        assert_eq!(task.description(), "count to 3");
    }

    #[test]
    fn double_registration_is_rejected() {
        let mut registry = TaskRegistry::new();
        registry.register::<CountTask>().unwrap();
        let result = registry.register::<CountTask>();
        assert!(matches!(result, Err(RegistryError::AlreadyRegistered(kind)) if kind == CountTask::KIND));
    }

    #[test]
    fn registered_kinds_are_sorted() {
        let mut registry = TaskRegistry::new();
        registry.register::<LabelTask>().unwrap();
        registry.register::<CountTask>().unwrap();
        assert_eq!(
            registry.registered_kinds(),
            vec![CountTask::KIND.to_string(), LabelTask::KIND.to_string()]
        );
    }

    #[test]
    fn unknown_kind_is_an_error() {
        let registry = TaskRegistry::new();
        let result = registry.decode("nope.v1", b"{}");
        assert!(matches!(result, Err(CodecError::UnknownKind(kind)) if kind == "nope.v1"));
    }

    #[test]
    fn kinds_are_not_confused() {
        let mut registry = TaskRegistry::new();
        registry.register::<CountTask>().unwrap();
        registry.register::<LabelTask>().unwrap();

        // CountTask の payload を LabelTask として読むと失敗する
        let bytes = serde_json::to_vec(&CountTask { value: 1 }).unwrap();
        assert!(matches!(
            registry.decode(LabelTask::KIND, &bytes),
            Err(CodecError::Json(_))
        ));
    }
}

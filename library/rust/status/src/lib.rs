//! k1s0-status: サービス共通のエラー分類と gRPC ステータス変換。
//!
//! ビジネスロジック、ストレージ層、トランスポート層はエラーを
//! [`ServiceError`] として受け渡す。`tonic::Status` への変換は全域的で、
//! `ServiceError` でない(またはラップしていない)エラーはすべて `INTERNAL` +
//! 固定メッセージ [`INTERNAL_SERVER_ERROR`] になるため、内部情報
//! (SQL 文やスタック情報) が呼び出し元に漏れることはない。

use tonic::{Code, Status};

/// 内部エラー時に呼び出し元へ返す固定メッセージ。ハンドラが実際に何を
/// 返したかに関わらずこの文字列に置き換えられる。テストや呼び出し元が
/// ポリシーを直接検証できるよう定数として公開する。
pub const INTERNAL_SERVER_ERROR: &str = "Internal Server Error";

/// サービス間で共有するエラー種別の閉集合。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorKind {
    /// 内部エラー。デフォルト: 分類できないものはすべてここに落ちる。
    #[default]
    Internal,
    /// 対象のエンティティが存在しない。
    NotFound,
    /// エンティティが既に存在する。
    AlreadyExists,
    /// 呼び出し元の引数が不正。
    InvalidArgument,
}

/// ServiceError は閉集合の種別とメッセージを持つサービスエラー。
///
/// [`ErrorKind::Internal`] のメッセージは機微情報として扱い、ワイヤには
/// 一切送らない。他の 3 種別は呼び出し元が対処可能なメッセージを
/// そのまま通す。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ServiceError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ServiceError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyExists, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }
}

impl From<ServiceError> for Status {
    fn from(e: ServiceError) -> Self {
        match e.kind {
            // 元のメッセージはプロセス外に出さない
            ErrorKind::Internal => Status::internal(INTERNAL_SERVER_ERROR),
            ErrorKind::NotFound => Status::not_found(e.message),
            ErrorKind::AlreadyExists => Status::already_exists(e.message),
            ErrorKind::InvalidArgument => Status::invalid_argument(e.message),
        }
    }
}

impl From<Status> for ServiceError {
    /// 受信したワイヤステータスから分類値を復元する。
    ///
    /// `INTERNAL` については非可逆: サーバ側が送信前に元メッセージを破棄して
    /// いるため、固定メッセージ以上の情報は復元できない。閉集合外のコードも
    /// 同様に `Internal` に畳み込む。
    fn from(status: Status) -> Self {
        match status.code() {
            Code::NotFound => Self::not_found(status.message()),
            Code::AlreadyExists => Self::already_exists(status.message()),
            Code::InvalidArgument => Self::invalid_argument(status.message()),
            _ => Self::internal(INTERNAL_SERVER_ERROR),
        }
    }
}

/// 任意のハンドラエラーをワイヤステータスへ変換する。
///
/// `err` のチェーン中に [`ServiceError`] があれば分類に従ってマッピングし、
/// なければ `INTERNAL` + 固定メッセージになる。構成上、分類に失敗することは
/// ない。
pub fn error_to_status(err: &anyhow::Error) -> Status {
    match err.downcast_ref::<ServiceError>() {
        Some(e) => e.clone().into(),
        None => Status::internal(INTERNAL_SERVER_ERROR),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn internal_message_is_never_leaked() {
        let status: Status = ServiceError::internal("db exploded: password=hunter2").into();
        assert_eq!(status.code(), Code::Internal);
        assert_eq!(status.message(), INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn caller_safe_kinds_pass_message_through() {
        let status: Status = ServiceError::not_found("widget not found").into();
        assert_eq!(status.code(), Code::NotFound);
        assert_eq!(status.message(), "widget not found");

        let status: Status = ServiceError::already_exists("user already exists").into();
        assert_eq!(status.code(), Code::AlreadyExists);
        assert_eq!(status.message(), "user already exists");

        let status: Status = ServiceError::invalid_argument("id must be a uuid").into();
        assert_eq!(status.code(), Code::InvalidArgument);
        assert_eq!(status.message(), "id must be a uuid");
    }

    #[test]
    fn unrelated_error_maps_to_internal() {
        let err = anyhow::anyhow!("connection reset by peer");
        let status = error_to_status(&err);
        assert_eq!(status.code(), Code::Internal);
        assert_eq!(status.message(), INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn wrapped_service_error_is_found_in_chain() {
        let err = anyhow::Error::from(ServiceError::not_found("widget not found"))
            .context("loading widget");
        let status = error_to_status(&err);
        assert_eq!(status.code(), Code::NotFound);
        assert_eq!(status.message(), "widget not found");
    }

    #[test]
    fn status_round_trips_for_taxonomy_codes() {
        let e = ServiceError::from(Status::already_exists("user already exists"));
        assert_eq!(e.kind, ErrorKind::AlreadyExists);
        assert_eq!(e.message, "user already exists");

        let e = ServiceError::from(Status::not_found("widget not found"));
        assert_eq!(e.kind, ErrorKind::NotFound);
        assert_eq!(e.message, "widget not found");
    }

    #[test]
    fn reverse_mapping_is_lossy_for_internal() {
        let e = ServiceError::from(Status::internal("should have been sanitized"));
        assert_eq!(e.kind, ErrorKind::Internal);
        assert_eq!(e.message, INTERNAL_SERVER_ERROR);

        // 閉集合外のコードも Internal に畳み込まれる
        let e = ServiceError::from(Status::unavailable("backend down"));
        assert_eq!(e.kind, ErrorKind::Internal);
        assert_eq!(e.message, INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn default_kind_is_internal() {
        assert_eq!(ErrorKind::default(), ErrorKind::Internal);
    }
}

//! gRPC サーバ用のステータスサニタイズミドルウェア。
//!
//! サーバ全体に適用する Tower Layer。登録された全サービスがここを通るため、
//! どのハンドラも未サニタイズのエラーをワイヤに書けない。unary 呼び出しの
//! ハンドラエラーを tonic は trailers-only レスポンスとして HTTP ヘッダの
//! `grpc-status`/`grpc-message` にエンコードするので、この層がそのヘッダを
//! 書き換え、閉集合のコードだけをプロセス外に出す:
//!
//! - `NOT_FOUND`, `ALREADY_EXISTS`, `INVALID_ARGUMENT`: そのまま通す
//!   (メッセージは契約上、呼び出し元が対処可能なもの)。
//! - それ以外 (`INTERNAL` 自身を含む): コードを `INTERNAL` に強制し、
//!   メッセージを [`INTERNAL_SERVER_ERROR`] に置き換える。
//!
//! 層は状態を持たず、トランスポートが割り当てたタスク上で並行に動く。

use std::task::{Context, Poll};

use http::{HeaderValue, Request, Response};
use pin_project_lite::pin_project;
use tower::{Layer, Service};

use k1s0_status::INTERNAL_SERVER_ERROR;

const GRPC_STATUS: &str = "grpc-status";
const GRPC_MESSAGE: &str = "grpc-message";

/// 無変更でプロセス外に出てよい `tonic::Code` のワイヤ値。
const PASS_THROUGH: [i32; 4] = [
    0, // OK
    3, // INVALID_ARGUMENT
    5, // NOT_FOUND
    6, // ALREADY_EXISTS
];

const INTERNAL: i32 = 13;

/// SanitizeStatusLayer は全サービスに [`SanitizeStatus`] を被せる Tower Layer。
#[derive(Debug, Clone, Copy, Default)]
pub struct SanitizeStatusLayer;

impl SanitizeStatusLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for SanitizeStatusLayer {
    type Service = SanitizeStatus<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SanitizeStatus { inner }
    }
}

/// SanitizeStatus は `grpc-status`/`grpc-message` レスポンスヘッダを
/// スクラブする Tower Service。
#[derive(Debug, Clone)]
pub struct SanitizeStatus<S> {
    inner: S,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for SanitizeStatus<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = SanitizeStatusFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        SanitizeStatusFuture {
            inner: self.inner.call(req),
        }
    }
}

pin_project! {
    pub struct SanitizeStatusFuture<F> {
        #[pin]
        inner: F,
    }
}

impl<F, ResBody, E> std::future::Future for SanitizeStatusFuture<F>
where
    F: std::future::Future<Output = Result<Response<ResBody>, E>>,
{
    type Output = F::Output;

    fn poll(self: std::pin::Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match this.inner.poll(cx) {
            Poll::Ready(Ok(mut response)) => {
                sanitize(&mut response);
                Poll::Ready(Ok(response))
            }
            other => other,
        }
    }
}

/// レスポンスヘッダを in place で書き換える。
///
/// 成功した unary レスポンスの `grpc-status` はヘッダではなく trailer に
/// 載るためここでは触らない。ヘッダにこの値を持つのは trailers-only の
/// エラー経路だけで、それがまさにサニタイズ対象の経路になる。
fn sanitize<B>(response: &mut Response<B>) {
    let Some(code) = response
        .headers()
        .get(GRPC_STATUS)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<i32>().ok())
    else {
        return;
    };

    if PASS_THROUGH.contains(&code) {
        return;
    }

    let headers = response.headers_mut();
    headers.insert(GRPC_STATUS, HeaderValue::from(INTERNAL));
    headers.insert(GRPC_MESSAGE, HeaderValue::from_static(INTERNAL_SERVER_ERROR));
}

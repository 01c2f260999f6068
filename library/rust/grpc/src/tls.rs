//! PEM 証明書ファイルからの mTLS 設定読み込み。
//!
//! 呼び出しごとにファイルを読み直してパースする。読み込みはプロセス起動時の
//! クライアント/サーバ構築ごとに一度きりなので、キャッシュや無効化の仕組みは
//! 持たない。並行呼び出し可。

use std::fs;
use std::path::PathBuf;

use serde::Deserialize;
use tonic::transport::{Certificate, ClientTlsConfig, Identity, ServerTlsConfig};

/// TLS ファイルパス設定。通常はサービス設定からデシリアライズする。
///
/// `enable` が false のときパスフィールドは使われない。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub enable: bool,
    /// 相手方の検証に使う CA バンドル。
    #[serde(default)]
    pub ca: PathBuf,
    /// 相手方に提示するローカルのリーフ証明書。
    #[serde(default)]
    pub cert: PathBuf,
    /// リーフ証明書の秘密鍵。
    #[serde(default)]
    pub key: PathBuf,
}

/// 証明書読み込みエラー。ファイル欠落と PEM 破損を起動時診断で区別できるよう、
/// I/O 失敗とパース失敗は別の種別にする。
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no valid PEM certificates in CA bundle {0}")]
    InvalidCaCertificate(PathBuf),

    #[error("no valid PEM certificates in {0}")]
    InvalidCertificate(PathBuf),

    #[error("no valid PEM private key in {0}")]
    InvalidPrivateKey(PathBuf),
}

/// 検証済み PEM マテリアル一式: 信頼プールとローカル identity。
struct TlsMaterial {
    ca: Certificate,
    identity: Identity,
}

fn read(path: &PathBuf) -> Result<Vec<u8>, TlsError> {
    fs::read(path).map_err(|source| TlsError::Io {
        path: path.clone(),
        source,
    })
}

/// `pem` にパース可能な PEM 証明書が 1 枚以上あることを要求する。
fn check_cert_pem(pem: &[u8], err: impl FnOnce() -> TlsError) -> Result<(), TlsError> {
    let mut reader = pem;
    let mut count = 0usize;
    for cert in rustls_pemfile::certs(&mut reader) {
        if cert.is_err() {
            return Err(err());
        }
        count += 1;
    }
    if count == 0 {
        return Err(err());
    }
    Ok(())
}

/// 3 つの PEM ファイルを読み込んで検証する。
///
/// `tonic` の `Certificate`/`Identity` は生バイトを保持してハンドシェイク時に
/// 初めてパースするため、ここで先行検証することで不正な証明書を初回呼び出し
/// ではなく構築時点で失敗させる。
fn load_material(cfg: &TlsConfig) -> Result<TlsMaterial, TlsError> {
    let ca_pem = read(&cfg.ca)?;
    check_cert_pem(&ca_pem, || TlsError::InvalidCaCertificate(cfg.ca.clone()))?;

    let cert_pem = read(&cfg.cert)?;
    check_cert_pem(&cert_pem, || TlsError::InvalidCertificate(cfg.cert.clone()))?;

    let key_pem = read(&cfg.key)?;
    let mut key_reader = key_pem.as_slice();
    match rustls_pemfile::private_key(&mut key_reader) {
        Ok(Some(_)) => {}
        Ok(None) | Err(_) => return Err(TlsError::InvalidPrivateKey(cfg.key.clone())),
    }

    Ok(TlsMaterial {
        ca: Certificate::from_pem(ca_pem),
        identity: Identity::from_pem(cert_pem, key_pem),
    })
}

/// クライアント側 TLS 設定を構築する。サーバ証明書は CA バンドルで検証し、
/// クライアント認証のためローカル identity を提示する。
pub fn client_tls_config(cfg: &TlsConfig) -> Result<ClientTlsConfig, TlsError> {
    let material = load_material(cfg)?;
    Ok(ClientTlsConfig::new()
        .ca_certificate(material.ca)
        .identity(material.identity))
}

/// サーバ側 TLS 設定を構築する。CA を client CA root に設定することで
/// クライアント証明書は必須かつ検証される。部分的な信頼モードはない。
pub fn server_tls_config(cfg: &TlsConfig) -> Result<ServerTlsConfig, TlsError> {
    let material = load_material(cfg)?;
    Ok(ServerTlsConfig::new()
        .identity(material.identity)
        .client_ca_root(material.ca))
}

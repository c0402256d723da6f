//! The Mega download protocol: encrypted chunked transfers with CBC-MAC
//! verification, anonymous and account sessions.
//!
//! Payloads are AES-CTR encrypted; every chunk (0x20000 bytes growing to
//! 0x100000) carries a CBC-MAC that folds into a file MAC, and the condensed
//! file MAC must equal the meta-MAC embedded in the file key. A mismatch
//! after a full transfer fails the download.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use aes::Aes128;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit, KeyIvInit, StreamCipher};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use futures_util::StreamExt;
use rsa::BigUint;
use serde_json::{Value, json};
use sha2::Sha512;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};

use super::{
    Download, DownloadError, DownloadKind, DownloadMeta, DownloadState, DownloadStatus,
    SharedState,
};
use crate::blocklist::BlocklistReason;
use crate::credentials::CredentialData;
use crate::library::fsops::make_filename_safe;
use crate::source::DownloadSource;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

const MEGA_API_URL: &str = "https://g.api.mega.co.nz/cs";

/// How long a Mega session token stays usable.
const SESSION_TTL: Duration = Duration::from_secs(3600);

// region Crypto primitives

fn a32_to_bytes(a: &[u32]) -> Vec<u8> {
    a.iter().flat_map(|n| n.to_be_bytes()).collect()
}

fn bytes_to_a32(s: &[u8]) -> Vec<u32> {
    let mut out = vec![0u32; s.len().div_ceil(4)];
    for (i, byte) in s.iter().enumerate() {
        out[i >> 2] |= u32::from(*byte) << (24 - (i & 3) * 8);
    }
    out
}

fn base64_decode(data: &str) -> Result<Vec<u8>, DownloadError> {
    URL_SAFE_NO_PAD
        .decode(data.trim_end_matches('='))
        .map_err(|_| DownloadError::client_not_working("malformed base64 from Mega"))
}

fn base64_encode(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

fn aes_cipher(key: &[u32]) -> Aes128 {
    let key_bytes = a32_to_bytes(key);
    Aes128::new(GenericArray::from_slice(&key_bytes))
}

fn ecb_decrypt(data: &[u8], key: &[u32]) -> Vec<u8> {
    let cipher = aes_cipher(key);
    let mut out = data.to_vec();
    for block in out.chunks_exact_mut(16) {
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
    }
    out
}

fn ecb_encrypt(data: &[u8], key: &[u32]) -> Vec<u8> {
    let cipher = aes_cipher(key);
    let mut out = data.to_vec();
    for block in out.chunks_exact_mut(16) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
    out
}

fn cbc_decrypt(data: &[u8], key: &[u32]) -> Vec<u8> {
    let cipher = aes_cipher(key);
    let mut previous = [0u8; 16];
    let mut out = data.to_vec();
    for block in out.chunks_exact_mut(16) {
        let encrypted: [u8; 16] = match block.try_into() {
            Ok(b) => b,
            Err(_) => break,
        };
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
        for (b, p) in block.iter_mut().zip(previous.iter()) {
            *b ^= p;
        }
        previous = encrypted;
    }
    out
}

fn cbc_encrypt(data: &[u8], key: &[u32]) -> Vec<u8> {
    let cipher = aes_cipher(key);
    let mut previous = [0u8; 16];
    let mut out = data.to_vec();
    for block in out.chunks_exact_mut(16) {
        for (b, p) in block.iter_mut().zip(previous.iter()) {
            *b ^= p;
        }
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
        previous = match block.try_into() {
            Ok(b) => b,
            Err(_) => break,
        };
    }
    out
}

fn decrypt_key(data: &str, key: &[u32]) -> Result<Vec<u32>, DownloadError> {
    Ok(bytes_to_a32(&ecb_decrypt(&base64_decode(data)?, key)))
}

fn encrypt_key(data: &[u32], key: &[u32]) -> Vec<u32> {
    bytes_to_a32(&ecb_encrypt(&a32_to_bytes(data), key))
}

/// Splits a full 8-word node key into cipher key, CTR IV and meta-MAC.
fn get_cipher_key(key: &[u32]) -> ([u32; 4], [u32; 4], [u32; 2]) {
    let k = [
        key[0] ^ key[4],
        key[1] ^ key[5],
        key[2] ^ key[6],
        key[3] ^ key[7],
    ];
    let iv = [key[4], key[5], 0, 0];
    let meta_mac = [key[6], key[7]];
    (k, iv, meta_mac)
}

/// Decrypts a node attribute blob and pulls out the embedded JSON.
fn decrypt_attr(data: &str, key: &[u32]) -> Result<Value, DownloadError> {
    let k: Vec<u32> = if key.len() == 4 {
        key.to_vec()
    } else {
        get_cipher_key(key).0.to_vec()
    };
    let attr = cbc_decrypt(&base64_decode(data)?, &k);

    if !attr.starts_with(b"MEGA{\"") {
        return Err(DownloadError::client_not_working(
            "decryption of Mega attributes failed",
        ));
    }
    let start = 4;
    let end = attr
        .iter()
        .rposition(|b| *b == b'}')
        .ok_or_else(|| DownloadError::client_not_working("malformed Mega attributes"))?;
    serde_json::from_slice(&attr[start..=end])
        .map_err(|_| DownloadError::client_not_working("malformed Mega attributes"))
}

/// The chunk layout of an encrypted file: 0x20000 growing by 0x20000 per
/// chunk up to 0x100000, then constant.
fn chunk_sizes(size: u64) -> Vec<u64> {
    let mut out = Vec::new();
    let mut start = 0u64;
    let mut chunk = 0x20000u64;
    while start + chunk < size {
        out.push(chunk);
        start += chunk;
        if chunk < 0x100_000 {
            chunk += 0x20000;
        }
    }
    if start < size {
        out.push(size - start);
    }
    out
}

/// Incremental CBC-MAC over the decrypted payload, per Mega chunk.
struct Checksum {
    cipher: Aes128,
    iv: [u8; 16],
    file_mac: [u8; 16],
}

impl Checksum {
    fn new(key: &[u32]) -> Self {
        let (k, iv, _) = get_cipher_key(key);
        let iv01 = a32_to_bytes(&[iv[0], iv[1], iv[0], iv[1]]);
        let mut iv_arr = [0u8; 16];
        iv_arr.copy_from_slice(&iv01);
        Self {
            cipher: aes_cipher(&k),
            iv: iv_arr,
            file_mac: [0u8; 16],
        }
    }

    fn update(&mut self, chunk: &[u8]) {
        let mut chunk_mac = self.iv;
        for block in chunk.chunks(16) {
            let mut padded = [0u8; 16];
            padded[..block.len()].copy_from_slice(block);
            for (m, b) in chunk_mac.iter_mut().zip(padded.iter()) {
                *m ^= b;
            }
            self.cipher
                .encrypt_block(GenericArray::from_mut_slice(&mut chunk_mac));
        }

        for (f, c) in self.file_mac.iter_mut().zip(chunk_mac.iter()) {
            *f ^= c;
        }
        self.cipher
            .encrypt_block(GenericArray::from_mut_slice(&mut self.file_mac));
    }

    fn digest(&self) -> [u32; 2] {
        let d = bytes_to_a32(&self.file_mac);
        [d[0] ^ d[1], d[2] ^ d[3]]
    }
}

// region API client

/// Thin JSON client for Mega's `cs` endpoint.
#[derive(Debug)]
struct MegaApiClient {
    http: reqwest::Client,
    sequence: AtomicU64,
    sid: Mutex<Option<String>>,
    node_id: Option<String>,
}

impl MegaApiClient {
    fn new(http: reqwest::Client, node_id: Option<String>) -> Self {
        Self {
            http,
            sequence: AtomicU64::new(u64::from(rand::random::<u32>())),
            sid: Mutex::new(None),
            node_id,
        }
    }

    fn set_sid(&self, sid: String) {
        *self
            .sid
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(sid);
    }

    fn sid(&self) -> Option<String> {
        self.sid
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    async fn request(&self, payload: Value) -> Result<Value, DownloadError> {
        let mut params: Vec<(String, String)> = vec![(
            "id".to_string(),
            self.sequence.fetch_add(1, Ordering::SeqCst).to_string(),
        )];
        if let Some(sid) = self.sid() {
            params.push(("sid".to_string(), sid));
        }
        if let Some(node_id) = &self.node_id {
            params.push(("n".to_string(), node_id.clone()));
        }

        let response: Value = self
            .http
            .post(MEGA_API_URL)
            .query(&params)
            .json(&json!([payload]))
            .send()
            .await
            .map_err(|e| DownloadError::network(MEGA_API_URL, e))?
            .json()
            .await
            .map_err(|_| {
                DownloadError::client_not_working(
                    "an unexpected error occurred when making contact with Mega",
                )
            })?;

        let first = match response {
            Value::Array(mut items) if !items.is_empty() => items.remove(0),
            other => other,
        };
        if let Some(code) = first.as_i64() {
            return Err(DownloadError::client_not_working(format!(
                "Mega API error {code}"
            )));
        }
        Ok(first)
    }
}

// region Sessions

/// Cache of session tokens per credential email, valid for one hour.
#[derive(Debug, Default)]
pub struct MegaSessionCache {
    tokens: Mutex<HashMap<String, (String, Instant)>>,
}

impl MegaSessionCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, email: &str) -> Option<String> {
        let tokens = self
            .tokens
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        tokens
            .get(email)
            .filter(|(_, stamp)| stamp.elapsed() < SESSION_TTL)
            .map(|(sid, _)| sid.clone())
    }

    fn put(&self, email: &str, sid: String) {
        self.tokens
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(email.to_string(), (sid, Instant::now()));
    }

    /// Drops all cached sessions; called when credentials change.
    pub fn invalidate(&self) {
        self.tokens
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clear();
    }
}

fn mpi_to_biguint(s: &[u8]) -> BigUint {
    BigUint::from_bytes_be(&s[2..])
}

/// Derives the v1 password key (iterated AES over the password words).
fn password_key_v1(password: &str) -> Vec<u32> {
    let mut password_key = vec![0x93C4_67E3u32, 0x7DB0_C7A4, 0xD1BE_3F81, 0x0152_CB56];
    let password_a32 = bytes_to_a32(password.as_bytes());

    for _ in 0..0x10000 {
        for j in (0..password_a32.len()).step_by(4) {
            let mut key = [0u32; 4];
            for i in 0..4 {
                if i + j < password_a32.len() {
                    key[i] = password_a32[i + j];
                }
            }
            password_key = bytes_to_a32(&cbc_encrypt(&a32_to_bytes(&password_key), &key));
        }
    }
    password_key
}

fn user_hash_v1(user: &str, password_key: &[u32]) -> String {
    let user_a32 = bytes_to_a32(user.as_bytes());
    let mut user_hash = [0u32; 4];
    for (i, word) in user_a32.iter().enumerate() {
        user_hash[i % 4] ^= word;
    }

    let mut hash_bytes = a32_to_bytes(&user_hash);
    for _ in 0..0x4000 {
        hash_bytes = cbc_encrypt(&hash_bytes, password_key);
    }
    let hash_a32 = bytes_to_a32(&hash_bytes);
    base64_encode(&a32_to_bytes(&[hash_a32[0], hash_a32[2]]))
}

async fn login_user(
    client: &MegaApiClient,
    user: &str,
    password: &str,
) -> Result<String, DownloadError> {
    debug!("logging into Mega with user account");
    let user = user.to_lowercase();

    let prelogin = client.request(json!({"a": "us0", "user": user})).await?;
    if prelogin.get("e").is_some() {
        return Err(DownloadError::client_not_working(
            "an unexpected error occurred when making contact with Mega",
        ));
    }

    let (password_key, user_hash) = match prelogin.get("v").and_then(Value::as_i64) {
        Some(1) => {
            let password_key = password_key_v1(password);
            let user_hash = user_hash_v1(&user, &password_key);
            (password_key, user_hash)
        }
        Some(2) => {
            let salt = base64_decode(
                prelogin
                    .get("s")
                    .and_then(Value::as_str)
                    .unwrap_or_default(),
            )?;
            let mut derived = [0u8; 32];
            pbkdf2::pbkdf2_hmac::<Sha512>(password.as_bytes(), &salt, 100_000, &mut derived);
            (bytes_to_a32(&derived[..16]), base64_encode(&derived[16..]))
        }
        other => {
            return Err(DownloadError::client_not_working(format!(
                "Mega account version not supported: {other:?}"
            )));
        }
    };

    process_login(client, &user, Some(&user_hash), &password_key).await
}

async fn login_anonymous(client: &MegaApiClient) -> Result<String, DownloadError> {
    debug!("logging into Mega anonymously");

    let master_key: Vec<u32> = (0..4).map(|_| rand::random::<u32>()).collect();
    let password_key: Vec<u32> = (0..4).map(|_| rand::random::<u32>()).collect();
    let challenge: Vec<u32> = (0..4).map(|_| rand::random::<u32>()).collect();

    let mut ts = a32_to_bytes(&challenge);
    ts.extend(a32_to_bytes(&encrypt_key(&challenge, &master_key)));

    let response = client
        .request(json!({
            "a": "up",
            "k": base64_encode(&a32_to_bytes(&encrypt_key(&master_key, &password_key))),
            "ts": base64_encode(&ts),
        }))
        .await?;
    let user = response
        .as_str()
        .ok_or_else(|| {
            DownloadError::client_not_working(
                "an unexpected error occurred when making contact with Mega",
            )
        })?
        .to_string();

    process_login(client, &user, None, &password_key).await
}

async fn process_login(
    client: &MegaApiClient,
    user: &str,
    user_hash: Option<&str>,
    password_key: &[u32],
) -> Result<String, DownloadError> {
    let payload = match user_hash {
        Some(uh) => json!({"a": "us", "user": user, "uh": uh}),
        None => json!({"a": "us", "user": user}),
    };
    let res = client.request(payload).await?;
    if res.get("e").is_some() {
        return Err(DownloadError::client_not_working(
            "an unexpected error occurred when making contact with Mega",
        ));
    }

    let master_key = decrypt_key(
        res.get("k").and_then(Value::as_str).unwrap_or_default(),
        password_key,
    )?;

    if let Some(tsid) = res.get("tsid").and_then(Value::as_str) {
        let raw = base64_decode(tsid)?;
        if raw.len() >= 32 {
            let verified = a32_to_bytes(&encrypt_key(&bytes_to_a32(&raw[..16]), &master_key));
            if verified == raw[raw.len() - 16..] {
                return Ok(tsid.to_string());
            }
        }
        return Err(DownloadError::client_not_working("failed to login into Mega"));
    }

    if let Some(csid) = res.get("csid").and_then(Value::as_str) {
        let mut privk = a32_to_bytes(&decrypt_key(
            res.get("privk").and_then(Value::as_str).unwrap_or_default(),
            &master_key,
        )?);

        let mut rsa_parts: Vec<BigUint> = Vec::with_capacity(4);
        for _ in 0..4 {
            if privk.len() < 2 {
                return Err(DownloadError::client_not_working("failed to login into Mega"));
            }
            let bits = usize::from(privk[0]) * 256 + usize::from(privk[1]);
            let len = bits.div_ceil(8) + 2;
            if len > privk.len() {
                return Err(DownloadError::client_not_working("failed to login into Mega"));
            }
            rsa_parts.push(mpi_to_biguint(&privk[..len]));
            privk.drain(..len);
        }
        if privk.len() >= 16 {
            return Err(DownloadError::client_not_working("failed to login into Mega"));
        }

        let encrypted_sid = mpi_to_biguint(&base64_decode(csid)?);
        let modulus = &rsa_parts[0] * &rsa_parts[1];
        let sid_int = encrypted_sid.modpow(&rsa_parts[2], &modulus);

        let mut sid_bytes = sid_int.to_bytes_be();
        if sid_bytes.len() % 2 != 0 {
            sid_bytes.insert(0, 0);
        }
        if sid_bytes.len() < 43 {
            return Err(DownloadError::client_not_working("failed to login into Mega"));
        }
        return Ok(base64_encode(&sid_bytes[..43]));
    }

    Err(DownloadError::client_not_working("failed to login into Mega"))
}

/// Logs the client in: a cached session, then each stored credential, then
/// anonymously.
async fn login(
    client: &MegaApiClient,
    credentials: &[CredentialData],
    sessions: &MegaSessionCache,
) -> Result<(), DownloadError> {
    let mut attempts: Vec<(String, Option<(String, String)>)> = credentials
        .iter()
        .filter_map(|c| {
            let email = c.email.clone()?;
            let password = c.password.clone()?;
            Some((email.clone(), Some((email, password))))
        })
        .collect();
    attempts.push((String::new(), None));

    for (cache_key, account) in attempts {
        if let Some(sid) = sessions.get(&cache_key) {
            client.set_sid(sid);
            return Ok(());
        }

        let result = match &account {
            Some((email, password)) => login_user(client, email, password).await,
            None => login_anonymous(client).await,
        };
        match result {
            Ok(sid) => {
                sessions.put(&cache_key, sid.clone());
                client.set_sid(sid);
                return Ok(());
            }
            Err(e) => {
                warn!(error = %e, "Mega login attempt failed");
            }
        }
    }

    Err(DownloadError::client_not_working("unable to login in any way"))
}

// region Download

/// One encrypted file to transfer.
#[derive(Debug, Clone)]
struct MegaTarget {
    /// `p` parameter for single files, `n` for folder nodes.
    node_id: String,
    node_in_folder: bool,
    size: u64,
    name: String,
    key: Vec<u32>,
}

/// A download of a Mega file or folder.
///
/// Folder downloads fetch every file node and pack them into a single zip
/// in the download folder.
#[derive(Debug)]
pub struct MegaDownload {
    meta: DownloadMeta,
    kind: DownloadKind,
    shared: SharedState,
    client: MegaApiClient,
    targets: Vec<MegaTarget>,
}

fn parse_file_url(link: &str) -> Result<(String, String), DownloadError> {
    // New-style /file/<id>#<key> and old-style #!<id>!<key>.
    if let Some(rest) = link.split("/file/").nth(1) {
        if let Some((id, key)) = rest.split_once('#') {
            return Ok((id.to_string(), key.to_string()));
        }
    }
    if let Some(rest) = link.split("#!").nth(1) {
        if let Some((id, key)) = rest.split_once('!') {
            return Ok((id.to_string(), key.to_string()));
        }
    }
    Err(DownloadError::link_broken(BlocklistReason::LinkBroken))
}

fn parse_folder_url(link: &str) -> Result<(String, String), DownloadError> {
    let rest = link
        .split("/folder/")
        .nth(1)
        .ok_or_else(|| DownloadError::link_broken(BlocklistReason::LinkBroken))?;
    let (id, key_part) = rest
        .split_once('#')
        .ok_or_else(|| DownloadError::link_broken(BlocklistReason::LinkBroken))?;
    let key = key_part.split('/').next().unwrap_or(key_part);
    if id.is_empty() || key.is_empty() {
        return Err(DownloadError::link_broken(BlocklistReason::LinkBroken));
    }
    Ok((id.to_string(), key.to_string()))
}

impl MegaDownload {
    /// Creates a Mega download: logs in, resolves the node(s), decrypts the
    /// attributes for filenames and sizes.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::LinkBroken`] for an unparsable link,
    /// [`DownloadError::LimitReached`] when the account's transfer quota is
    /// exhausted, and [`DownloadError::ClientNotWorking`] for protocol
    /// failures.
    #[instrument(skip_all, fields(link = %meta.download_link))]
    pub async fn create(
        http: reqwest::Client,
        kind: DownloadKind,
        meta: DownloadMeta,
        credentials: &[CredentialData],
        sessions: &MegaSessionCache,
        preferred_filename_body: Option<String>,
    ) -> Result<Self, DownloadError> {
        let folder = kind == DownloadKind::MegaFolder;

        let (node_id, key_b64) = if folder {
            parse_folder_url(&meta.download_link)?
        } else {
            parse_file_url(&meta.download_link)?
        };
        let master_key = bytes_to_a32(&base64_decode(&key_b64)?);

        let client = MegaApiClient::new(http, folder.then(|| node_id.clone()));
        login(&client, credentials, sessions).await?;

        let mut targets = Vec::new();
        let mut total_size: u64 = 0;
        let mut mega_filename = String::new();

        if folder {
            let res = client.request(json!({"a": "f", "c": 1, "r": 1, "ca": 1})).await?;
            let nodes = res
                .get("f")
                .and_then(Value::as_array)
                .ok_or_else(|| {
                    DownloadError::client_not_working(
                        "the Mega folder download link is not found or broken",
                    )
                })?;

            for node in nodes {
                let node_type = node.get("t").and_then(Value::as_i64).unwrap_or(-1);
                let raw_key = node.get("k").and_then(Value::as_str).unwrap_or_default();

                if node_type == 1 {
                    // The root folder node names the zip.
                    if let Some(enc) = raw_key.split(':').nth(1) {
                        let folder_key = decrypt_key(enc, &master_key)?;
                        let attr = decrypt_attr(
                            node.get("a").and_then(Value::as_str).unwrap_or_default(),
                            &folder_key,
                        )?;
                        mega_filename = format!(
                            "{}.zip",
                            attr.get("n").and_then(Value::as_str).unwrap_or("folder")
                        );
                    }
                } else if node_type == 0 && raw_key.contains(':') {
                    let Some(enc) = raw_key.split(':').nth(1) else {
                        continue;
                    };
                    let node_key = decrypt_key(enc, &master_key)?;
                    let attr = decrypt_attr(
                        node.get("a").and_then(Value::as_str).unwrap_or_default(),
                        &node_key,
                    )?;
                    let size = node.get("s").and_then(Value::as_u64).unwrap_or(0);
                    targets.push(MegaTarget {
                        node_id: node
                            .get("h")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        node_in_folder: true,
                        size,
                        name: attr
                            .get("n")
                            .and_then(Value::as_str)
                            .unwrap_or("file")
                            .to_string(),
                        key: node_key,
                    });
                    total_size += size;
                }
            }
            if targets.is_empty() {
                return Err(DownloadError::client_not_working(
                    "the Mega folder contains no downloadable files",
                ));
            }
        } else {
            let res = client
                .request(json!({"a": "g", "g": 1, "p": node_id, "ssl": 1}))
                .await
                .map_err(|_| {
                    DownloadError::client_not_working(
                        "the Mega download link is not found, does not exist anymore or is broken",
                    )
                })?;
            if res.get("e").is_some() || res.get("g").is_none() {
                return Err(DownloadError::client_not_working(
                    "the Mega download link is not found, does not exist anymore or is broken",
                ));
            }
            if res.get("tl").and_then(Value::as_i64).unwrap_or(0) != 0 {
                return Err(DownloadError::LimitReached {
                    source: DownloadSource::Mega,
                });
            }

            let attr = decrypt_attr(
                res.get("at").and_then(Value::as_str).unwrap_or_default(),
                &master_key,
            )?;
            mega_filename = attr
                .get("n")
                .and_then(Value::as_str)
                .unwrap_or("file")
                .to_string();
            let size = res.get("s").and_then(Value::as_u64).unwrap_or(0);
            total_size = size;
            targets.push(MegaTarget {
                node_id,
                node_in_folder: false,
                size,
                name: mega_filename.clone(),
                key: master_key,
            });
        }

        let extension = mega_filename
            .rfind('.')
            .map(|dot| mega_filename[dot..].to_string())
            .unwrap_or_default();
        let body = preferred_filename_body
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| {
                mega_filename
                    .rfind('.')
                    .map_or(mega_filename.clone(), |dot| mega_filename[..dot].to_string())
            });
        let file = super::filename::build_download_path(
            &meta.download_folder,
            &make_filename_safe(&body),
            &extension,
        );
        let title = body.rsplit('/').next().unwrap_or(&body).to_string();

        let meta = DownloadMeta {
            title,
            filename_body: body,
            ..meta
        };
        let download = Self {
            meta,
            kind,
            shared: SharedState::new(total_size as i64, vec![file]),
            client,
            targets,
        };
        Ok(download)
    }

    async fn transfer_target(
        &self,
        target: &MegaTarget,
        destination: &PathBuf,
        downloaded_before: u64,
        total_size: u64,
    ) -> Result<u64, DownloadError> {
        let payload = if target.node_in_folder {
            json!({"a": "g", "g": 1, "n": target.node_id, "ssl": 1})
        } else {
            json!({"a": "g", "g": 1, "p": target.node_id, "ssl": 1})
        };
        let res = self.client.request(payload).await?;
        if res.get("tl").and_then(Value::as_i64).unwrap_or(0) != 0 {
            return Err(DownloadError::LimitReached {
                source: DownloadSource::Mega,
            });
        }
        let url = res
            .get("g")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                DownloadError::client_not_working(
                    "the Mega download link is not found, does not exist anymore or is broken",
                )
            })?
            .to_string();

        let (k, iv, meta_mac) = get_cipher_key(&target.key);
        let mut decryptor = Aes128Ctr::new(
            GenericArray::from_slice(&a32_to_bytes(&k)),
            GenericArray::from_slice(&a32_to_bytes(&iv)),
        );
        let mut mac = Checksum::new(&target.key);

        let response = self
            .client
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| DownloadError::network(url.clone(), e))?;
        if !response.status().is_success() {
            return Err(DownloadError::http_status(url, response.status().as_u16()));
        }

        let mut file = tokio::fs::File::create(destination)
            .await
            .map_err(|e| DownloadError::io(destination.clone(), e))?;
        let mut stream = response.bytes_stream();

        let schedule = chunk_sizes(target.size);
        let mut schedule_iter = schedule.into_iter();
        let mut current_chunk = schedule_iter.next().unwrap_or(0);
        let mut chunk_buf: Vec<u8> = Vec::with_capacity(0x20000);
        let mut downloaded = 0u64;
        let mut window_start = Instant::now();

        'outer: loop {
            let item = tokio::select! {
                () = self.shared.stop_signal().notified() => break 'outer,
                item = stream.next() => item,
            };
            let Some(item) = item else { break };
            let bytes = item.map_err(|e| DownloadError::network(self.meta.pure_link.clone(), e))?;
            if self.shared.state().is_stopped() {
                break;
            }

            let mut offset = 0usize;
            while offset < bytes.len() {
                let needed = (current_chunk as usize).saturating_sub(chunk_buf.len());
                if needed == 0 {
                    break;
                }
                let take = needed.min(bytes.len() - offset);
                chunk_buf.extend_from_slice(&bytes[offset..offset + take]);
                offset += take;

                if chunk_buf.len() == current_chunk as usize && current_chunk > 0 {
                    decryptor.apply_keystream(&mut chunk_buf);
                    mac.update(&chunk_buf);
                    file.write_all(&chunk_buf)
                        .await
                        .map_err(|e| DownloadError::io(destination.clone(), e))?;

                    downloaded += chunk_buf.len() as u64;
                    let elapsed = window_start.elapsed().as_secs_f64().max(1e-6);
                    let speed = (chunk_buf.len() as f64 / elapsed * 100.0).round() / 100.0;
                    let progress = ((downloaded_before + downloaded) as f64
                        / total_size.max(1) as f64
                        * 10_000.0)
                        .round()
                        / 100.0;
                    self.shared.set_progress(progress, speed);
                    window_start = Instant::now();

                    chunk_buf.clear();
                    current_chunk = schedule_iter.next().unwrap_or(0);
                }
            }
        }

        if !self.shared.state().is_stopped() {
            // Flush a trailing partial chunk (connection ended early).
            if !chunk_buf.is_empty() {
                decryptor.apply_keystream(&mut chunk_buf);
                mac.update(&chunk_buf);
                file.write_all(&chunk_buf)
                    .await
                    .map_err(|e| DownloadError::io(destination.clone(), e))?;
                downloaded += chunk_buf.len() as u64;
            }
            file.flush()
                .await
                .map_err(|e| DownloadError::io(destination.clone(), e))?;

            if downloaded < target.size {
                // Transfer quota ran out mid-download.
                return Err(DownloadError::LimitReached {
                    source: DownloadSource::Mega,
                });
            }
            if mac.digest() != meta_mac {
                return Err(DownloadError::CorruptPayload {
                    description: "mismatched Mega meta-MAC".to_string(),
                });
            }
        }

        Ok(downloaded)
    }

    async fn transfer_all(&self) -> Result<(), DownloadError> {
        let destination = self
            .shared
            .files()
            .into_iter()
            .next()
            .ok_or_else(|| DownloadError::client_not_working("download has no target file"))?;
        let total: u64 = self.targets.iter().map(|t| t.size).sum();

        if self.targets.len() == 1 && !self.targets[0].node_in_folder {
            self.transfer_target(&self.targets[0], &destination, 0, total)
                .await?;
            return Ok(());
        }

        // Folder: fetch each file beside the final zip, then pack.
        let mut staged: Vec<(PathBuf, String)> = Vec::new();
        let mut downloaded = 0u64;
        for (index, target) in self.targets.iter().enumerate() {
            if self.shared.state().is_stopped() {
                break;
            }
            let part = destination.with_extension(format!("part{index}"));
            downloaded += self
                .transfer_target(target, &part, downloaded, total)
                .await?;
            staged.push((part, target.name.clone()));
        }

        if self.shared.state().is_stopped() {
            for (part, _) in &staged {
                let _ = std::fs::remove_file(part);
            }
            return Ok(());
        }

        let zip_path = destination.clone();
        let staged_for_zip = staged.clone();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let file = std::fs::File::create(&zip_path)?;
            let mut zip = zip::ZipWriter::new(file);
            let options = zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Stored)
                .large_file(true);
            for (part, name) in &staged_for_zip {
                zip.start_file(name.clone(), options)
                    .map_err(std::io::Error::other)?;
                let mut source = std::fs::File::open(part)?;
                std::io::copy(&mut source, &mut zip)?;
            }
            zip.finish().map_err(std::io::Error::other)?;
            Ok(())
        })
        .await
        .map_err(|e| DownloadError::client_not_working(format!("zip task failed: {e}")))?
        .map_err(|e| DownloadError::io(destination.clone(), e))?;

        for (part, _) in &staged {
            let _ = std::fs::remove_file(part);
        }
        Ok(())
    }
}

#[async_trait]
impl Download for MegaDownload {
    fn meta(&self) -> &DownloadMeta {
        &self.meta
    }

    fn kind(&self) -> DownloadKind {
        self.kind
    }

    fn status(&self) -> DownloadStatus {
        self.shared.status()
    }

    fn state(&self) -> DownloadState {
        self.shared.state()
    }

    fn set_state(&self, state: DownloadState) {
        self.shared.set_state(state);
    }

    fn files(&self) -> Vec<PathBuf> {
        self.shared.files()
    }

    fn set_files(&self, files: Vec<PathBuf>) {
        self.shared.set_files(files);
    }

    async fn run(&self) {
        self.shared.set_state(DownloadState::Downloading);
        if let Err(e) = self.transfer_all().await {
            if !self.shared.state().is_stopped() {
                warn!(error = %e, link = %self.meta.download_link, "Mega download failed");
                self.shared.set_state(DownloadState::Failed);
            }
        }
    }

    fn stop(&self, state: DownloadState) {
        self.shared.request_stop(state);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_a32_round_trip() {
        let words = vec![0x0102_0304u32, 0xAABB_CCDD];
        let bytes = a32_to_bytes(&words);
        assert_eq!(bytes, vec![1, 2, 3, 4, 0xAA, 0xBB, 0xCC, 0xDD]);
        assert_eq!(bytes_to_a32(&bytes), words);
    }

    #[test]
    fn test_ecb_encrypt_decrypt_round_trip() {
        let key = [1u32, 2, 3, 4];
        let data = b"exactly 16 bytes".to_vec();
        let encrypted = ecb_encrypt(&data, &key);
        assert_ne!(encrypted, data);
        assert_eq!(ecb_decrypt(&encrypted, &key), data);
    }

    #[test]
    fn test_cbc_encrypt_decrypt_round_trip() {
        let key = [9u32, 8, 7, 6];
        let data = vec![0x42u8; 32];
        let encrypted = cbc_encrypt(&data, &key);
        assert_eq!(cbc_decrypt(&encrypted, &key), data);
    }

    #[test]
    fn test_key_encrypt_decrypt_round_trip() {
        let key = [5u32, 6, 7, 8];
        let node_key = vec![1u32, 2, 3, 4, 5, 6, 7, 8];
        let encrypted = encrypt_key(&node_key, &key);
        let encoded = base64_encode(&a32_to_bytes(&encrypted));
        assert_eq!(decrypt_key(&encoded, &key).unwrap(), node_key);
    }

    #[test]
    fn test_chunk_schedule_grows_to_cap() {
        let chunks = chunk_sizes(0x500_000);
        assert_eq!(chunks[0], 0x20000);
        assert_eq!(chunks[1], 0x40000);
        assert!(chunks.iter().all(|c| *c <= 0x100_000));
        assert_eq!(chunks.iter().sum::<u64>(), 0x500_000);

        let small = chunk_sizes(100);
        assert_eq!(small, vec![100]);
    }

    #[test]
    fn test_cipher_key_split() {
        let key: Vec<u32> = (1..=8).collect();
        let (k, iv, meta_mac) = get_cipher_key(&key);
        assert_eq!(k, [1 ^ 5, 2 ^ 6, 3 ^ 7, 4 ^ 8]);
        assert_eq!(iv, [5, 6, 0, 0]);
        assert_eq!(meta_mac, [7, 8]);
    }

    #[test]
    fn test_checksum_is_deterministic() {
        let key: Vec<u32> = (1..=8).collect();
        let mut a = Checksum::new(&key);
        let mut b = Checksum::new(&key);
        a.update(&[1u8; 100]);
        b.update(&[1u8; 100]);
        assert_eq!(a.digest(), b.digest());

        let mut c = Checksum::new(&key);
        c.update(&[2u8; 100]);
        assert_ne!(a.digest(), c.digest());
    }

    #[test]
    fn test_parse_file_urls() {
        let (id, key) = parse_file_url("https://mega.nz/file/AbC123#keykey").unwrap();
        assert_eq!(id, "AbC123");
        assert_eq!(key, "keykey");

        let (id, key) = parse_file_url("https://mega.co.nz/#!old123!oldkey").unwrap();
        assert_eq!(id, "old123");
        assert_eq!(key, "oldkey");

        assert!(parse_file_url("https://mega.nz/nothing").is_err());
    }

    #[test]
    fn test_parse_folder_url() {
        let (id, key) = parse_folder_url("https://mega.nz/folder/Fold1#fkey/folder/sub").unwrap();
        assert_eq!(id, "Fold1");
        assert_eq!(key, "fkey");
    }

    #[test]
    fn test_session_cache_expiry_and_invalidation() {
        let cache = MegaSessionCache::new();
        cache.put("user@example.com", "sid123".to_string());
        assert_eq!(
            cache.get("user@example.com").as_deref(),
            Some("sid123")
        );
        cache.invalidate();
        assert!(cache.get("user@example.com").is_none());
    }

    #[test]
    fn test_decrypt_attr_round_trip() {
        let key = [1u32, 2, 3, 4];
        let attr = br#"MEGA{"n":"My Comic.cbz"}"#;
        let mut padded = attr.to_vec();
        padded.resize(padded.len().div_ceil(16) * 16, 0);
        let encrypted = base64_encode(&cbc_encrypt(&padded, &key));

        let decoded = decrypt_attr(&encrypted, &key).unwrap();
        assert_eq!(
            decoded.get("n").and_then(Value::as_str),
            Some("My Comic.cbz")
        );
    }
}

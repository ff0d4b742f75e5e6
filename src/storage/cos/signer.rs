//! COS request signing (HMAC-SHA1, signature v5)
//! Reference: https://cloud.tencent.com/document/product/436/7778

use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::header::HeaderMap;
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;
use urlencoding::{decode, encode};

type HmacSha1 = Hmac<Sha1>;

/// Signs one request. Header and query names are lower-cased and URL-encoded;
/// BTreeMap keeps them in the sorted order the signature requires.
pub struct Signer<'a> {
    method: &'a str,
    url_path: &'a str,
    headers: BTreeMap<String, String>,
    query: BTreeMap<String, String>,
}

impl<'a> Signer<'a> {
    pub fn new(method: &'a str, url_path: &'a str, headers: &HeaderMap, query: &[(&str, &str)]) -> Self {
        let headers = headers
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str(), v)));
        Self {
            method,
            url_path,
            headers: encode_pairs(headers),
            query: encode_pairs(query.iter().copied()),
        }
    }

    /// Authorization value valid for `valid_seconds` from now
    pub fn authorization(&self, secret_id: &str, secret_key: &str, valid_seconds: u64) -> String {
        let start = Utc::now().timestamp();
        self.authorization_at(secret_id, secret_key, start, start + valid_seconds as i64)
    }

    fn authorization_at(&self, secret_id: &str, secret_key: &str, start: i64, end: i64) -> String {
        let key_time = format!("{};{}", start, end);
        let sign_key = hmac_sha1_hex(secret_key.as_bytes(), &key_time);
        let signature = hmac_sha1_hex(sign_key.as_bytes(), &self.string_to_sign(&key_time));
        format!(
            "q-sign-algorithm=sha1&q-ak={}&q-sign-time={}&q-key-time={}&q-header-list={}&q-url-param-list={}&q-signature={}",
            secret_id,
            key_time,
            key_time,
            key_list(&self.headers),
            key_list(&self.query),
            signature
        )
    }

    fn http_string(&self) -> String {
        let path = decode(self.url_path)
            .map(|p| p.into_owned())
            .unwrap_or_else(|_| self.url_path.to_string());
        format!(
            "{}\n{}\n{}\n{}\n",
            self.method,
            path,
            pair_string(&self.query),
            pair_string(&self.headers)
        )
    }

    fn string_to_sign(&self, key_time: &str) -> String {
        let digest = Sha1::digest(self.http_string().as_bytes());
        format!("sha1\n{}\n{}\n", key_time, hex::encode(digest))
    }
}

fn encode_pairs<I, K, V>(pairs: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (encode(k.as_ref()).to_lowercase(), encode(v.as_ref()).into_owned()))
        .collect()
}

fn key_list(map: &BTreeMap<String, String>) -> String {
    map.keys().cloned().collect::<Vec<_>>().join(";")
}

fn pair_string(map: &BTreeMap<String, String>) -> String {
    map.iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

fn hmac_sha1_hex(key: &[u8], message: &str) -> String {
    let mut mac = HmacSha1::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

// src/contacts.rs
//! Contact privacy filter: known senders are never forwarded for analysis.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::path::{Path, PathBuf};

use crate::models::ContactLookupResult;

/// Read-only view of the device's contact/people store.
///
/// Lookups are synchronous and may block on the backing store; errors
/// bubble up so the filter can map them to its fail-open result.
pub trait ContactStore: Send + Sync {
    /// Number of contacts whose display name contains the query.
    fn matches_by_name(&self, query: &str) -> Result<usize, Box<dyn StdError + Send + Sync>>;

    /// Number of contacts with a phone number matching the identifier.
    fn matches_by_number(&self, number: &str) -> Result<usize, Box<dyn StdError + Send + Sync>>;
}

/// Decides whether a sender identifier belongs to a known contact.
///
/// Display-name lookup first; if the identifier contains digits, a
/// phone-number lookup as well. Any store error maps to `LookupFailed`,
/// which callers treat as `Unknown` (fail-open to analysis).
pub fn is_known(store: &dyn ContactStore, sender: &str) -> ContactLookupResult {
    if sender.trim().is_empty() {
        // Scrape-sourced events may carry no sender; never match those.
        return ContactLookupResult::Unknown;
    }

    match store.matches_by_name(sender) {
        Ok(n) if n > 0 => return ContactLookupResult::Known,
        Ok(_) => {}
        Err(e) => {
            eprintln!("✗ Contact name lookup failed: {}", e);
            return ContactLookupResult::LookupFailed;
        }
    }

    if sender.chars().any(|c| c.is_ascii_digit()) {
        match store.matches_by_number(sender) {
            Ok(n) if n > 0 => return ContactLookupResult::Known,
            Ok(_) => {}
            Err(e) => {
                eprintln!("✗ Contact number lookup failed: {}", e);
                return ContactLookupResult::LookupFailed;
            }
        }
    }

    ContactLookupResult::Unknown
}

/// Contacts store backed by the vcards the sync daemon mirrors on disk,
/// with the older per-device JSON cache as a second source.
pub struct VcardContactStore {
    vcard_dir: PathBuf,
    fallback_dir: PathBuf,
}

impl VcardContactStore {
    /// Store rooted at the default sync locations under $HOME.
    pub fn from_home() -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let home = std::env::var("HOME")?;
        Ok(Self {
            vcard_dir: PathBuf::from(format!("{}/.local/share/kpeoplevcard", home)),
            fallback_dir: PathBuf::from(format!("{}/.local/share/kdeconnect", home)),
        })
    }

    pub fn new(vcard_dir: PathBuf, fallback_dir: PathBuf) -> Self {
        Self {
            vcard_dir,
            fallback_dir,
        }
    }

    /// Reads every synced contact as (name -> phone numbers).
    fn load(&self) -> Result<HashMap<String, Vec<String>>, Box<dyn StdError + Send + Sync>> {
        let mut contacts = HashMap::new();
        let mut readable_sources = 0;

        if read_vcard_tree(&self.vcard_dir, &mut contacts).is_ok() {
            readable_sources += 1;
        }
        if read_fallback_caches(&self.fallback_dir, &mut contacts).is_ok() {
            readable_sources += 1;
        }

        // Both sources unreadable is a store failure, not an empty store.
        if readable_sources == 0 {
            return Err("no contact source readable".into());
        }

        Ok(contacts)
    }
}

impl ContactStore for VcardContactStore {
    fn matches_by_name(&self, query: &str) -> Result<usize, Box<dyn StdError + Send + Sync>> {
        let contacts = self.load()?;
        let query = query.trim().to_lowercase();
        Ok(contacts
            .keys()
            .filter(|name| name.to_lowercase().contains(&query))
            .count())
    }

    fn matches_by_number(&self, number: &str) -> Result<usize, Box<dyn StdError + Send + Sync>> {
        let contacts = self.load()?;
        Ok(contacts
            .values()
            .flatten()
            .filter(|candidate| phone_numbers_match(candidate, number))
            .count())
    }
}

fn read_vcard_tree(
    base: &Path,
    contacts: &mut HashMap<String, Vec<String>>,
) -> Result<(), Box<dyn StdError + Send + Sync>> {
    let entries = std::fs::read_dir(base)?;

    for entry in entries.flatten() {
        let dir_path = entry.path();
        if !dir_path.is_dir() {
            continue;
        }

        let Ok(vcf_entries) = std::fs::read_dir(&dir_path) else {
            continue;
        };

        for vcf_entry in vcf_entries.flatten() {
            let vcf_path = vcf_entry.path();
            let ext = vcf_path.extension().and_then(|s| s.to_str());

            if ext != Some("vcf") && ext != Some("vcard") {
                continue;
            }

            if let Ok(content) = std::fs::read_to_string(&vcf_path) {
                if let (Some(name), phones) = parse_vcard(&content) {
                    contacts.entry(name).or_default().extend(phones);
                }
            }
        }
    }

    Ok(())
}

fn read_fallback_caches(
    base: &Path,
    contacts: &mut HashMap<String, Vec<String>>,
) -> Result<(), Box<dyn StdError + Send + Sync>> {
    let entries = std::fs::read_dir(base)?;

    for entry in entries.flatten() {
        let cache_path = entry.path().join("contacts");
        if !cache_path.exists() {
            continue;
        }

        let Ok(content) = std::fs::read_to_string(&cache_path) else {
            continue;
        };
        let Ok(json) = serde_json::from_str::<serde_json::Value>(&content) else {
            continue;
        };
        let Some(obj) = json.as_object() else {
            continue;
        };

        for (_id, contact_data) in obj.iter() {
            let Some(contact_obj) = contact_data.as_object() else {
                continue;
            };

            let name = contact_obj
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            if name.is_empty() {
                continue;
            }

            if let Some(phone_array) = contact_obj.get("phoneNumber").and_then(|v| v.as_array()) {
                for phone_entry in phone_array {
                    if let Some(number) = phone_entry
                        .as_object()
                        .and_then(|p| p.get("number"))
                        .and_then(|v| v.as_str())
                    {
                        contacts
                            .entry(name.to_string())
                            .or_default()
                            .push(number.to_string());
                    }
                }
            }
        }
    }

    Ok(())
}

/// Extracts (display name, phone numbers) from a VCard body.
pub fn parse_vcard(content: &str) -> (Option<String>, Vec<String>) {
    let mut name = None;
    let mut phones = Vec::new();

    for line in content.lines() {
        let line = line.trim();

        if let Some(value) = line.strip_prefix("FN:") {
            if name.is_none() && !value.trim().is_empty() {
                name = Some(value.trim().to_string());
            }
        } else if line.starts_with("TEL") {
            // TEL;TYPE=CELL:+1 555 000 1111 or TEL:+15550001111
            if let Some(idx) = line.find(':') {
                let number = line[idx + 1..].trim();
                if !number.is_empty() {
                    phones.push(number.to_string());
                }
            }
        }
    }

    (name, phones)
}

/// Compares phone numbers on digits only, tolerating country-code and
/// formatting differences by matching on the trailing 7+ digits.
pub fn phone_numbers_match(a: &str, b: &str) -> bool {
    let digits_a: String = a.chars().filter(|c| c.is_ascii_digit()).collect();
    let digits_b: String = b.chars().filter(|c| c.is_ascii_digit()).collect();

    if digits_a.is_empty() || digits_b.is_empty() {
        return false;
    }

    if digits_a == digits_b {
        return true;
    }

    let min_len = digits_a.len().min(digits_b.len());
    if min_len < 7 {
        return false;
    }

    digits_a[digits_a.len() - min_len..] == digits_b[digits_b.len() - min_len..]
}

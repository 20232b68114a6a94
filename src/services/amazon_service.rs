use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::{amazon, ExtractionResult};
use crate::providers::imap::{MailStore, MessageRecord, SearchQuery};

/// Mines Amazon notification mail for order numbers, arrival dates,
/// delivery exceptions and hub pickup codes.
///
/// Amazon sends from per-country domains, so searches go out once per
/// domain (plus any user-configured forwarding addresses) rather than
/// as one giant OR chain.
pub struct AmazonExtractor<'a, S: MailStore> {
    store: &'a mut S,
    today: NaiveDate,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DateParseError {
    #[error("unsupported locale tag: {0}")]
    UnknownLocale(String),
    #[error("phrase does not parse as a calendar date: {0}")]
    Unparseable(String),
}

#[derive(Debug, Error)]
enum PhotoError {
    #[error("photo request failed: {0}")]
    Http(String),
    #[error("photo write failed: {0}")]
    Io(#[from] std::io::Error),
}

impl<'a, S: MailStore> AmazonExtractor<'a, S> {
    pub fn new(store: &'a mut S, today: NaiveDate) -> Self {
        Self { store, today }
    }

    /// Counts shipments arriving today and collects order numbers over the
    /// lookback window.
    ///
    /// Every shipment-tracking sender is searched without a subject filter,
    /// so the order list picks up numbers from any Amazon mail in the
    /// window, while the count only reflects bodies whose arrival phrase
    /// resolves to today's date.
    pub async fn shipped(&mut self, days: u32, forwards: &[String]) -> ExtractionResult {
        let mut result = ExtractionResult::new();
        let Some(order_regex) = compile_pattern(amazon::ORDER_PATTERN, "amazon order") else {
            return result;
        };
        let since = self.today - chrono::Duration::days(i64::from(days));

        for senders in shipment_sender_groups(forwards) {
            let query = SearchQuery::build(&senders, since, None);
            let uids = match self.store.search(&query).await {
                Ok(uids) => uids,
                Err(e) => {
                    warn!(error = %e, "amazon shipment search failed");
                    continue;
                }
            };

            for uid in uids {
                let Some(raw) = self.fetch_raw(uid).await else {
                    continue;
                };
                let Some(record) = MessageRecord::parse(&raw) else {
                    debug!(uid, "skipping unparseable amazon message");
                    continue;
                };

                harvest_order(&record, &order_regex, &mut result);

                let Some(phrase) = arrival_phrase(&record) else {
                    continue;
                };
                match parse_arrival_date_any(&phrase, self.today) {
                    Some(date) if date == self.today => result.count += 1,
                    Some(date) => {
                        debug!(uid, %date, "shipment arrives on a later day");
                    }
                    None => debug!(uid, phrase = %phrase, "arrival phrase did not parse"),
                }
            }
        }

        debug!(
            count = result.count,
            orders = result.orders().len(),
            "amazon shipment extraction finished"
        );
        result
    }

    /// Counts packages delivered today across all regional delivered
    /// subjects.
    ///
    /// When `photo_target` is set, the first delivery-photo URL found in a
    /// matching body is downloaded to that path on a detached task; the
    /// count never waits on the download.
    pub async fn delivered(&mut self, forwards: &[String], photo_target: Option<PathBuf>) -> u32 {
        let senders = domain_senders(forwards);
        let mut count = 0u32;
        let mut matched = Vec::new();

        for &subject in amazon::DELIVERED_SUBJECTS {
            let query = SearchQuery::build(&senders, self.today, Some(subject));
            match self.store.search(&query).await {
                Ok(uids) => {
                    count += uids.len() as u32;
                    matched.extend(uids);
                }
                Err(e) => warn!(error = %e, subject, "amazon delivered search failed"),
            }
        }

        if let Some(target) = photo_target {
            if let Some(url) = self.find_photo_url(&matched).await {
                spawn_photo_download(url, target);
            }
        }

        debug!(count, "amazon delivered extraction finished");
        count
    }

    /// Counts shipments flagged as running late and collects their order
    /// numbers.
    pub async fn exception(&mut self, days: u32, forwards: &[String]) -> ExtractionResult {
        let mut result = ExtractionResult::new();
        let Some(order_regex) = compile_pattern(amazon::ORDER_PATTERN, "amazon order") else {
            return result;
        };
        let since = self.today - chrono::Duration::days(i64::from(days));
        let query = SearchQuery::build(&domain_senders(forwards), since, Some(amazon::EXCEPTION_SUBJECT));

        let uids = match self.store.search(&query).await {
            Ok(uids) => uids,
            Err(e) => {
                warn!(error = %e, "amazon exception search failed");
                return result;
            }
        };

        for uid in uids {
            let Some(raw) = self.fetch_raw(uid).await else {
                continue;
            };
            let Some(record) = MessageRecord::parse(&raw) else {
                debug!(uid, "skipping unparseable amazon message");
                continue;
            };
            if !record.contains(amazon::EXCEPTION_BODY) {
                continue;
            }
            result.count += 1;
            harvest_order(&record, &order_regex, &mut result);
        }

        debug!(count = result.count, "amazon exception extraction finished");
        result
    }

    /// Collects hub locker pickup codes from today's hub notifications.
    ///
    /// The subject line is preferred; bodies are only consulted when the
    /// subject carries no code. The caller derives the count from the list.
    pub async fn hub(&mut self, forwards: &[String]) -> Vec<String> {
        let mut codes = ExtractionResult::new();
        let patterns: Vec<Regex> = amazon::HUB_CODE_PATTERNS
            .iter()
            .filter_map(|p| compile_pattern(p, "amazon hub code"))
            .collect();
        if patterns.len() != amazon::HUB_CODE_PATTERNS.len() {
            return Vec::new();
        }

        let mut senders = vec![amazon::HUB_SENDER.to_string()];
        senders.extend(forwards.iter().cloned());
        let query = SearchQuery::build(&senders, self.today, Some(amazon::HUB_SUBJECT));

        let uids = match self.store.search(&query).await {
            Ok(uids) => uids,
            Err(e) => {
                warn!(error = %e, "amazon hub search failed");
                return Vec::new();
            }
        };

        for uid in uids {
            let Some(raw) = self.fetch_raw(uid).await else {
                continue;
            };
            let Some(record) = MessageRecord::parse(&raw) else {
                debug!(uid, "skipping unparseable amazon message");
                continue;
            };

            if let Some(subject) = record.subject() {
                if push_hub_code(subject, &patterns, &mut codes) {
                    continue;
                }
            }
            for body in record.body_parts() {
                if push_hub_code(body, &patterns, &mut codes) {
                    break;
                }
            }
        }

        let codes = codes.order_list();
        debug!(count = codes.len(), "amazon hub extraction finished");
        codes
    }

    async fn find_photo_url(&mut self, uids: &[u32]) -> Option<String> {
        let photo_regex = compile_pattern(amazon::PHOTO_URL_PATTERN, "amazon photo url")?;
        for &uid in uids {
            let Some(raw) = self.fetch_raw(uid).await else {
                continue;
            };
            let Some(record) = MessageRecord::parse(&raw) else {
                continue;
            };
            for body in record.body_parts() {
                if let Some(m) = photo_regex.find(body) {
                    return Some(m.as_str().to_string());
                }
            }
        }
        None
    }

    async fn fetch_raw(&mut self, uid: u32) -> Option<Vec<u8>> {
        match self.store.fetch(uid).await {
            Ok(raw) => Some(raw),
            Err(e) => {
                debug!(uid, error = %e, "fetch failed, skipping message");
                None
            }
        }
    }
}

/// One search group per regional domain with every shipment-tracking local
/// part, plus one group per forwarding address.
fn shipment_sender_groups(forwards: &[String]) -> Vec<Vec<String>> {
    let mut groups: Vec<Vec<String>> = amazon::DOMAINS
        .iter()
        .map(|domain| {
            amazon::SHIPMENT_SENDERS
                .iter()
                .map(|local| format!("{local}@{domain}"))
                .collect()
        })
        .collect();
    for fwd in forwards {
        groups.push(vec![fwd.clone()]);
    }
    groups
}

/// Bare domains double as FROM terms since IMAP FROM matches substrings.
fn domain_senders(forwards: &[String]) -> Vec<String> {
    amazon::DOMAINS
        .iter()
        .map(|d| (*d).to_string())
        .chain(forwards.iter().cloned())
        .collect()
}

fn harvest_order(record: &MessageRecord<'_>, regex: &Regex, result: &mut ExtractionResult) {
    if let Some(subject) = record.subject() {
        if let Some(m) = regex.captures(subject).and_then(|caps| caps.get(1)) {
            result.push_order(m.as_str());
            return;
        }
    }
    for body in record.body_parts() {
        if let Some(m) = regex.captures(body).and_then(|caps| caps.get(1)) {
            result.push_order(m.as_str());
            return;
        }
    }
}

fn push_hub_code(text: &str, patterns: &[Regex], codes: &mut ExtractionResult) -> bool {
    for pattern in patterns {
        if let Some(m) = pattern.captures(text).and_then(|caps| caps.get(2)) {
            codes.push_order(m.as_str());
            return true;
        }
    }
    false
}

/// Pulls the `"arriving: <date>"` fragment out of a message body.
///
/// The fragment is everything after the first matching phrase up to the end
/// of the line, truncated to three words, which is the `Weekday, Month day`
/// shape Amazon writes in every locale.
fn arrival_phrase(record: &MessageRecord<'_>) -> Option<String> {
    for body in record.body_parts() {
        for phrase in amazon::ARRIVAL_PHRASES {
            let Some(idx) = body.find(phrase) else {
                continue;
            };
            let after = &body[idx + phrase.len()..];
            let line = after.lines().next().unwrap_or("").trim();
            let words: Vec<&str> = line.split_whitespace().take(3).collect();
            if !words.is_empty() {
                return Some(words.join(" "));
            }
        }
    }
    None
}

/// Tries every supported locale in a fixed order; the first tag that yields
/// a valid calendar date wins.
fn parse_arrival_date_any(phrase: &str, today: NaiveDate) -> Option<NaiveDate> {
    amazon::LOCALES
        .iter()
        .find_map(|tag| parse_arrival_date(phrase, tag, today).ok())
}

/// Parses a `Weekday, Month day` phrase under a single locale tag.
///
/// Pure by construction: the reference date comes in as an argument and no
/// process-wide locale state is touched. Dates that fall before `today`
/// roll over into the next year, since Amazon only writes future arrivals.
pub fn parse_arrival_date(
    phrase: &str,
    tag: &str,
    today: NaiveDate,
) -> Result<NaiveDate, DateParseError> {
    let (weekdays, months) =
        locale_tables(tag).ok_or_else(|| DateParseError::UnknownLocale(tag.to_string()))?;
    let unparseable = || DateParseError::Unparseable(phrase.to_string());

    let (weekday_part, rest) = phrase.split_once(',').ok_or_else(unparseable)?;
    let weekday = weekday_part.trim().to_lowercase();
    if !weekdays.contains(&weekday.as_str()) {
        return Err(unparseable());
    }

    let mut words = rest.trim().split_whitespace();
    let month_name = words.next().ok_or_else(unparseable)?.to_lowercase();
    let month = months
        .iter()
        .position(|m| *m == month_name)
        .ok_or_else(unparseable)? as u32
        + 1;
    let day: u32 = words
        .next()
        .ok_or_else(unparseable)?
        .trim_matches(|c: char| !c.is_ascii_digit())
        .parse()
        .map_err(|_| unparseable())?;

    let year = if month < today.month() || (month == today.month() && day < today.day()) {
        today.year() + 1
    } else {
        today.year()
    };
    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(unparseable)
}

type LocaleTables = (&'static [&'static str; 7], &'static [&'static str; 12]);

fn locale_tables(tag: &str) -> Option<LocaleTables> {
    match tag {
        "en" => Some((
            &[
                "monday",
                "tuesday",
                "wednesday",
                "thursday",
                "friday",
                "saturday",
                "sunday",
            ],
            &[
                "january",
                "february",
                "march",
                "april",
                "may",
                "june",
                "july",
                "august",
                "september",
                "october",
                "november",
                "december",
            ],
        )),
        "de" => Some((
            &[
                "montag",
                "dienstag",
                "mittwoch",
                "donnerstag",
                "freitag",
                "samstag",
                "sonntag",
            ],
            &[
                "januar",
                "februar",
                "märz",
                "april",
                "mai",
                "juni",
                "juli",
                "august",
                "september",
                "oktober",
                "november",
                "dezember",
            ],
        )),
        "it" => Some((
            &[
                "lunedì",
                "martedì",
                "mercoledì",
                "giovedì",
                "venerdì",
                "sabato",
                "domenica",
            ],
            &[
                "gennaio",
                "febbraio",
                "marzo",
                "aprile",
                "maggio",
                "giugno",
                "luglio",
                "agosto",
                "settembre",
                "ottobre",
                "novembre",
                "dicembre",
            ],
        )),
        "fr" => Some((
            &[
                "lundi", "mardi", "mercredi", "jeudi", "vendredi", "samedi", "dimanche",
            ],
            &[
                "janvier",
                "février",
                "mars",
                "avril",
                "mai",
                "juin",
                "juillet",
                "août",
                "septembre",
                "octobre",
                "novembre",
                "décembre",
            ],
        )),
        "es" => Some((
            &[
                "lunes",
                "martes",
                "miércoles",
                "jueves",
                "viernes",
                "sábado",
                "domingo",
            ],
            &[
                "enero",
                "febrero",
                "marzo",
                "abril",
                "mayo",
                "junio",
                "julio",
                "agosto",
                "septiembre",
                "octubre",
                "noviembre",
                "diciembre",
            ],
        )),
        "nl" => Some((
            &[
                "maandag",
                "dinsdag",
                "woensdag",
                "donderdag",
                "vrijdag",
                "zaterdag",
                "zondag",
            ],
            &[
                "januari",
                "februari",
                "maart",
                "april",
                "mei",
                "juni",
                "juli",
                "augustus",
                "september",
                "oktober",
                "november",
                "december",
            ],
        )),
        "pt" => Some((
            &[
                "segunda-feira",
                "terça-feira",
                "quarta-feira",
                "quinta-feira",
                "sexta-feira",
                "sábado",
                "domingo",
            ],
            &[
                "janeiro",
                "fevereiro",
                "março",
                "abril",
                "maio",
                "junho",
                "julho",
                "agosto",
                "setembro",
                "outubro",
                "novembro",
                "dezembro",
            ],
        )),
        _ => None,
    }
}

fn compile_pattern(pattern: &str, what: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(regex) => Some(regex),
        Err(e) => {
            warn!(pattern = what, error = %e, "invalid pattern, skipping extraction");
            None
        }
    }
}

fn spawn_photo_download(url: String, target: PathBuf) {
    tokio::spawn(async move {
        if let Err(e) = download_photo(&url, &target).await {
            warn!(error = %e, "amazon delivery photo download failed");
        }
    });
}

async fn download_photo(url: &str, target: &Path) -> Result<(), PhotoError> {
    let response = reqwest::get(url)
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| PhotoError::Http(e.to_string()))?;
    let bytes = response
        .bytes()
        .await
        .map_err(|e| PhotoError::Http(e.to_string()))?;
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(target, &bytes).await?;
    debug!(target = %target.display(), "stored amazon delivery photo");
    Ok(())
}

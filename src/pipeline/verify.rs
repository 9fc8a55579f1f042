use std::sync::Arc;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::{PipelineError, PipelineResult};
use crate::guards::{apply_text_guards, check_modality, ModalityClassifier};
use crate::ir::{BandId, BandStatus, CacheEntry, CacheKey, Risk, SourceRequest};
use crate::models::{CompletionRequest, Stage};
use crate::textutil::{clip, LangCode};

use super::anchors::MeaningAnchors;
use super::cache::{BandCache, BandLinks, BandText};
use super::caller::ModelCaller;
use super::config::ModelSettings;
use super::prompts::{render_template, tone_instruction, PromptSet};
use super::status::StatusBoard;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    MeaningShift,
    MeaningLoss,
    MeaningAddition,
    Unnatural,
    ReverseSubject,
    ReverseUnnatural,
    #[serde(other)]
    Unknown,
}

impl IssueType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MeaningShift => "meaning_shift",
            Self::MeaningLoss => "meaning_loss",
            Self::MeaningAddition => "meaning_addition",
            Self::Unnatural => "unnatural",
            Self::ReverseSubject => "reverse_subject",
            Self::ReverseUnnatural => "reverse_unnatural",
            Self::Unknown => "unknown",
        }
    }

    #[must_use]
    pub fn is_meaning(self) -> bool {
        matches!(
            self,
            Self::MeaningShift | Self::MeaningLoss | Self::MeaningAddition
        )
    }

    #[must_use]
    pub fn is_naturalness(self) -> bool {
        matches!(
            self,
            Self::Unnatural | Self::ReverseSubject | Self::ReverseUnnatural
        )
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
}

impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(match raw.as_deref().map(str::trim) {
            Some(s) if s.eq_ignore_ascii_case("high") => Self::High,
            Some(s) if s.eq_ignore_ascii_case("medium") => Self::Medium,
            _ => Self::Low,
        })
    }
}

impl Severity {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct VerificationIssue {
    #[serde(rename = "type")]
    pub kind: IssueType,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub word: Option<String>,
    #[serde(default)]
    pub expected: Option<String>,
    #[serde(default)]
    pub got: Option<String>,
    #[serde(default)]
    pub phrase: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl VerificationIssue {
    #[must_use]
    pub fn is_actionable(&self) -> bool {
        self.severity >= Severity::Medium
    }

    fn render(&self) -> String {
        let mut out = format!("- [{}] {}", self.severity.as_str(), self.kind.as_str());
        let fields = [
            ("word", &self.word),
            ("expected", &self.expected),
            ("got", &self.got),
            ("phrase", &self.phrase),
        ];
        let mut first = true;
        for (name, value) in fields {
            let Some(v) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) else {
                continue;
            };
            out.push_str(if first { ": " } else { ", " });
            first = false;
            out.push_str(name);
            out.push('=');
            out.push_str(v);
        }
        if let Some(reason) = self.reason.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
            out.push_str(" (");
            out.push_str(reason);
            out.push(')');
        }
        out
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct VerificationReport {
    #[serde(default = "default_pass")]
    pub pass: bool,
    #[serde(default)]
    pub issues: Vec<VerificationIssue>,
}

fn default_pass() -> bool {
    true
}

impl VerificationReport {
    /// Meaning-class and naturalness-class issues that warrant a fix.
    #[must_use]
    pub fn actionable(&self) -> (Vec<&VerificationIssue>, Vec<&VerificationIssue>) {
        let mut meaning = Vec::new();
        let mut natural = Vec::new();
        for issue in self.issues.iter().filter(|i| i.is_actionable()) {
            if issue.kind.is_meaning() {
                meaning.push(issue);
            } else if issue.kind.is_naturalness() {
                natural.push(issue);
            }
        }
        (meaning, natural)
    }
}

#[derive(Deserialize)]
struct FixReply {
    #[serde(default)]
    translation: String,
    #[serde(default)]
    reverse_translation: String,
}

/// One band to check after it has been cached.
#[derive(Clone, Debug)]
pub struct VerifyJob {
    pub request: SourceRequest,
    pub band: BandId,
    pub key: CacheKey,
    pub anchors: MeaningAnchors,
}

/// Background checker. Jobs outlive the generation that scheduled them and are
/// only cancelled by [`Verifier::shutdown`].
#[derive(Clone)]
pub struct Verifier {
    caller: ModelCaller,
    prompts: Arc<PromptSet>,
    settings: Arc<ModelSettings>,
    classifier: Arc<dyn ModalityClassifier>,
    cache: Arc<BandCache>,
    status: Arc<StatusBoard>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl Verifier {
    pub fn new(
        caller: ModelCaller,
        prompts: Arc<PromptSet>,
        settings: Arc<ModelSettings>,
        classifier: Arc<dyn ModalityClassifier>,
        cache: Arc<BandCache>,
        status: Arc<StatusBoard>,
    ) -> Self {
        Self {
            caller,
            prompts,
            settings,
            classifier,
            cache,
            status,
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Spawns verification of `job`; returns immediately.
    pub fn schedule(&self, job: VerifyJob) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.status.set(&job.key, BandStatus::Idle);
        let this = self.clone();
        self.tracker.spawn(async move {
            this.run(job).await;
        });
    }

    /// Waits until every scheduled job, including ones scheduled meanwhile, ends.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Runs one job to completion. Always ends in `Passed`.
    pub async fn run(&self, job: VerifyJob) {
        self.status.set(&job.key, BandStatus::Verifying);
        if let Err(e) = self.verify_and_repair(&job).await {
            tracing::debug!(band = %job.band, "verification skipped: {e}");
        }
        self.status.set(&job.key, BandStatus::Passed);
    }

    async fn verify_and_repair(&self, job: &VerifyJob) -> PipelineResult<()> {
        let Some(entry) = self.cache.get(&job.key) else {
            return Ok(());
        };
        if entry.no_change {
            return Ok(());
        }

        let report = self.verify(job, &entry).await?;
        let (meaning, natural) = report.actionable();
        if meaning.is_empty() && natural.is_empty() {
            tracing::debug!(band = %job.band, pass = report.pass, "verification passed");
            return Ok(());
        }

        self.status.set(&job.key, BandStatus::Fixing);
        tracing::info!(
            band = %job.band,
            meaning = meaning.len(),
            naturalness = natural.len(),
            "repairing band"
        );

        let mut current = entry;
        if !meaning.is_empty() {
            if let Some(fixed) = self.fix(job, &current, Stage::FixMeaning, &meaning).await {
                current = fixed;
            }
        }
        if !natural.is_empty() {
            self.fix(job, &current, Stage::FixNaturalness, &natural)
                .await;
        }
        Ok(())
    }

    async fn verify(&self, job: &VerifyJob, entry: &CacheEntry) -> PipelineResult<VerificationReport> {
        let req = &job.request;
        let tone = tone_instruction(&job.band);
        let anchors = job.anchors.render_for_prompt();
        let user_prompt = render_template(
            &self.prompts.verify,
            &[
                ("source_lang", req.source_lang.as_str()),
                ("target_lang", req.target_lang.as_str()),
                ("source", req.text.as_str()),
                ("tone", tone.as_str()),
                ("anchors", anchors.as_str()),
                ("translation", entry.translation.as_str()),
                ("reverse_translation", entry.reverse_translation.as_str()),
            ],
        );
        let call = CompletionRequest {
            stage: Stage::Verify,
            model: self.settings.verification_model.clone(),
            system_prompt: self.prompts.system.clone(),
            user_prompt,
            temperature: self.settings.verify_temperature,
            max_output_tokens: self.settings.max_output_tokens,
        };
        self.caller
            .call_json(&job.key, &call, &self.cancel)
            .await
            .map_err(|e| {
                if e.is_cancelled() {
                    e
                } else {
                    PipelineError::VerificationUnavailable(e.to_string())
                }
            })
    }

    /// Applies one fix pass and writes it back. `None` leaves the band untouched.
    async fn fix(
        &self,
        job: &VerifyJob,
        current: &CacheEntry,
        stage: Stage,
        issues: &[&VerificationIssue],
    ) -> Option<CacheEntry> {
        let req = &job.request;
        let template = match stage {
            Stage::FixMeaning => &self.prompts.fix_meaning,
            _ => &self.prompts.fix_naturalness,
        };
        let tone = tone_instruction(&job.band);
        let anchors = job.anchors.render_for_prompt();
        let issues_text = issues
            .iter()
            .map(|i| i.render())
            .collect::<Vec<_>>()
            .join("\n");
        let user_prompt = render_template(
            template,
            &[
                ("source_lang", req.source_lang.as_str()),
                ("target_lang", req.target_lang.as_str()),
                ("source", req.text.as_str()),
                ("tone", tone.as_str()),
                ("issues", issues_text.as_str()),
                ("anchors", anchors.as_str()),
                ("translation", current.translation.as_str()),
            ],
        );
        let call = CompletionRequest {
            stage,
            model: self.settings.verification_model.clone(),
            system_prompt: self.prompts.system.clone(),
            user_prompt,
            temperature: self.settings.fix_temperature,
            max_output_tokens: self.settings.max_output_tokens,
        };
        let reply: FixReply = match self.caller.call_json(&job.key, &call, &self.cancel).await {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(band = %job.band, stage = stage.as_str(), "fix failed: {e}");
                return None;
            }
        };

        let source_lang = LangCode::parse(&req.source_lang);
        let target_lang = LangCode::parse(&req.target_lang);
        let reverse = if reply.reverse_translation.trim().is_empty() {
            current.reverse_translation.clone()
        } else {
            reply.reverse_translation
        };
        let guarded = apply_text_guards(
            &req.text,
            source_lang,
            target_lang,
            reply.translation.trim(),
            &reverse,
            Risk::Low,
            Some(&current.translation),
        );
        if guarded.translation.is_empty()
            || guarded.flags.iter().any(|f| f == "target_script_stripped")
        {
            tracing::debug!(band = %job.band, "fix discarded: {:?}", guarded.flags);
            return None;
        }
        if !job.band.is_base() && job.band.custom_style.is_none() {
            let check = check_modality(
                self.classifier.as_ref(),
                &req.text,
                source_lang,
                &guarded.translation,
                target_lang,
            );
            if check.violated() {
                tracing::debug!(
                    band = %job.band,
                    "fix discarded: {} became {}",
                    check.source.as_str(),
                    check.candidate.as_str()
                );
                return None;
            }
        }
        if guarded.translation == current.translation
            && guarded.reverse_translation == current.reverse_translation
        {
            return None;
        }
        if self.cancel.is_cancelled() {
            return None;
        }

        let links = links_for(req, &job.band);
        let write = self.cache.write_band(
            &job.key,
            BandText {
                translation: guarded.translation,
                reverse_translation: guarded.reverse_translation,
                risk: guarded.risk,
            },
            &links,
        );
        tracing::info!(
            band = %job.band,
            stage = stage.as_str(),
            "applied fix: {}",
            clip(&write.entry.translation, 80)
        );

        for released in write.released {
            let Some(band) = job
                .band
                .dependents()
                .into_iter()
                .find(|b| CacheKey::for_band(req, b) == released)
            else {
                continue;
            };
            self.schedule(VerifyJob {
                request: req.clone(),
                band,
                key: released,
                anchors: job.anchors.clone(),
            });
        }
        Some(write.entry)
    }
}

/// Cache keys of the neighbours of `band` for `request`.
#[must_use]
pub fn links_for(request: &SourceRequest, band: &BandId) -> BandLinks {
    BandLinks {
        lower: band.reference().map(|b| CacheKey::for_band(request, &b)),
        dependents: band
            .dependents()
            .iter()
            .map(|b| CacheKey::for_band(request, b))
            .collect(),
        is_base: band.is_base(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guards::RuleTableClassifier;
    use crate::ir::{Level, Tone};
    use crate::pipeline::testing::{reply, ScriptedBackend};
    use crate::pipeline::trace::TraceWriter;

    fn verifier(backend: Arc<ScriptedBackend>) -> (Verifier, Arc<BandCache>, Arc<StatusBoard>) {
        let cache = Arc::new(BandCache::new());
        let status = Arc::new(StatusBoard::new());
        let caller = ModelCaller::new(backend, Arc::new(TraceWriter::disabled()));
        let v = Verifier::new(
            caller,
            Arc::new(PromptSet::default()),
            Arc::new(ModelSettings::default()),
            Arc::new(RuleTableClassifier::builtin()),
            cache.clone(),
            status.clone(),
        );
        (v, cache, status)
    }

    fn request() -> SourceRequest {
        SourceRequest::new("明日送ってくれる？", "ja", "en", "v1")
    }

    fn seed(cache: &BandCache, req: &SourceRequest, band: &BandId, t: &str, r: &str) -> CacheKey {
        let key = CacheKey::for_band(req, band);
        cache.write_band(
            &key,
            BandText {
                translation: t.to_string(),
                reverse_translation: r.to_string(),
                risk: Risk::Low,
            },
            &links_for(req, band),
        );
        key
    }

    #[test]
    fn only_high_and_medium_issues_are_actionable() {
        let report: VerificationReport = serde_json::from_str(
            r#"{"pass": false, "issues": [
                {"type": "meaning_shift", "severity": "high", "word": "send"},
                {"type": "unnatural", "severity": "low", "phrase": "Can you"},
                {"type": "reverse_subject", "severity": "medium", "reason": "subject flipped"},
                {"type": "spelling", "severity": "high"}
            ]}"#,
        )
        .expect("report");
        let (meaning, natural) = report.actionable();
        assert_eq!(meaning.len(), 1);
        assert_eq!(natural.len(), 1);
        assert_eq!(natural[0].kind, IssueType::ReverseSubject);
        assert_eq!(
            meaning[0].render(),
            "- [high] meaning_shift: word=send"
        );
    }

    #[test]
    fn unknown_severity_reads_as_low() {
        let report: VerificationReport = serde_json::from_str(
            r#"{"issues": [
                {"type": "meaning_loss", "severity": "critical", "word": "tomorrow"},
                {"type": "meaning_shift", "word": "send"},
                {"type": "unnatural", "severity": "MEDIUM"}
            ]}"#,
        )
        .expect("report");
        assert!(report.pass);
        let severities: Vec<Severity> = report.issues.iter().map(|i| i.severity).collect();
        assert_eq!(severities, vec![Severity::Low, Severity::Low, Severity::Medium]);
        let (meaning, natural) = report.actionable();
        assert!(meaning.is_empty());
        assert_eq!(natural.len(), 1);
    }

    #[tokio::test]
    async fn passing_report_leaves_text_untouched() {
        let backend = Arc::new(ScriptedBackend::new(|req| match req.stage {
            Stage::Verify => Ok(r#"{"pass": true, "issues": []}"#.to_string()),
            other => panic!("unexpected stage {other:?}"),
        }));
        let (v, cache, status) = verifier(backend.clone());
        let req = request();
        let band = BandId::toned(Tone::Casual, Level::Fifty);
        let key = seed(&cache, &req, &band, "Can you send it tomorrow?", "明日送ってくれる？");

        v.schedule(VerifyJob {
            request: req,
            band,
            key: key.clone(),
            anchors: MeaningAnchors::default(),
        });
        v.wait_idle().await;

        assert_eq!(status.get(&key), BandStatus::Passed);
        assert_eq!(
            cache.get(&key).expect("entry").translation,
            "Can you send it tomorrow?"
        );
        assert_eq!(backend.count(Stage::Verify), 1);
    }

    #[tokio::test]
    async fn meaning_fix_runs_before_naturalness_fix_on_fixed_text() {
        let backend = Arc::new(ScriptedBackend::new(|req| match req.stage {
            Stage::Verify => Ok(r#"{"pass": false, "issues": [
                {"type": "meaning_loss", "severity": "high", "word": "tomorrow"},
                {"type": "unnatural", "severity": "medium", "phrase": "Send it"}
            ]}"#
            .to_string()),
            Stage::FixMeaning => Ok(reply("Send it tomorrow?", "明日送って？")),
            Stage::FixNaturalness => {
                assert!(req.user_prompt.contains("Send it tomorrow?"));
                Ok(reply("Can you send it tomorrow?", "明日送ってくれる？"))
            }
            other => panic!("unexpected stage {other:?}"),
        }));
        let (v, cache, status) = verifier(backend.clone());
        let req = request();
        let band = BandId::toned(Tone::Casual, Level::Fifty);
        let key = seed(&cache, &req, &band, "Can you send it?", "送ってくれる？");

        let mut rx = status.subscribe();
        v.run(VerifyJob {
            request: req,
            band,
            key: key.clone(),
            anchors: MeaningAnchors::default(),
        })
        .await;

        let entry = cache.get(&key).expect("entry");
        assert_eq!(entry.translation, "Can you send it tomorrow?");
        assert_eq!(backend.count(Stage::FixMeaning), 1);
        assert_eq!(backend.count(Stage::FixNaturalness), 1);

        let seen: Vec<BandStatus> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.status)
            .collect();
        assert_eq!(
            seen,
            vec![BandStatus::Verifying, BandStatus::Fixing, BandStatus::Passed]
        );
    }

    #[tokio::test]
    async fn fix_that_changes_mood_is_discarded() {
        let backend = Arc::new(ScriptedBackend::new(|req| match req.stage {
            Stage::Verify => Ok(r#"{"issues": [{"type": "meaning_shift", "severity": "high"}]}"#
                .to_string()),
            Stage::FixMeaning => Ok(reply("Did you send it tomorrow?", "明日送った？")),
            other => panic!("unexpected stage {other:?}"),
        }));
        let (v, cache, status) = verifier(backend);
        let req = request();
        let band = BandId::toned(Tone::Business, Level::Fifty);
        let key = seed(&cache, &req, &band, "Could you send it tomorrow?", "明日送ってもらえる？");

        v.run(VerifyJob {
            request: req,
            band,
            key: key.clone(),
            anchors: MeaningAnchors::default(),
        })
        .await;
        assert_eq!(
            cache.get(&key).expect("entry").translation,
            "Could you send it tomorrow?"
        );
        assert_eq!(status.get(&key), BandStatus::Passed);
    }

    #[tokio::test]
    async fn backend_failure_counts_as_passed() {
        let backend = Arc::new(ScriptedBackend::new(|_| {
            Err(PipelineError::Backend {
                status: 503,
                message: "down".to_string(),
                details: None,
            })
        }));
        let (v, cache, status) = verifier(backend);
        let req = request();
        let band = BandId::base();
        let key = seed(&cache, &req, &band, "Can you send it tomorrow?", "明日送ってくれる？");
        v.run(VerifyJob {
            request: req,
            band,
            key: key.clone(),
            anchors: MeaningAnchors::default(),
        })
        .await;
        assert_eq!(status.get(&key), BandStatus::Passed);
        assert_eq!(
            cache.get(&key).expect("entry").translation,
            "Can you send it tomorrow?"
        );
    }

    #[tokio::test]
    async fn repair_of_fifty_equal_to_hundred_marks_both() {
        let backend = Arc::new(ScriptedBackend::new(|req| match req.stage {
            Stage::Verify => Ok(r#"{"issues": [{"type": "unnatural", "severity": "medium"}]}"#
                .to_string()),
            Stage::FixNaturalness => Ok(reply(
                "Would you be so kind as to send it tomorrow?",
                "明日送っていただけますか？",
            )),
            other => panic!("unexpected stage {other:?}"),
        }));
        let (v, cache, _) = verifier(backend);
        let req = request();
        seed(&cache, &req, &BandId::base(), "Can you send it tomorrow?", "明日送ってくれる？");
        let b50 = BandId::toned(Tone::Business, Level::Fifty);
        let b100 = BandId::toned(Tone::Business, Level::Hundred);
        let k50 = seed(&cache, &req, &b50, "Could you send it tomorrow?", "明日送ってもらえる？");
        let k100 = seed(
            &cache,
            &req,
            &b100,
            "Would you be so kind as to send it tomorrow?",
            "明日お送りいただけますでしょうか？",
        );
        assert!(!cache.get(&k100).expect("100").no_change);

        v.run(VerifyJob {
            request: req,
            band: b50,
            key: k50.clone(),
            anchors: MeaningAnchors::default(),
        })
        .await;

        assert!(cache.get(&k50).expect("50").no_change);
        let hundred = cache.get(&k100).expect("100");
        assert!(hundred.no_change);
        assert_eq!(hundred.reverse_translation, "明日送っていただけますか？");
    }
}

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use studybuddy_core::{
    Decision, Difficulty, Feature, Identity, MeteredRequest, NoteLength, PlanLimits, PlanTier,
    StudyError, SubscriptionStatus,
};

#[derive(Parser, Debug)]
#[command(name = "studybuddy")]
#[command(about = "StudyBuddy - daily quotas and Pro subscription")]
#[command(version)]
pub struct Cli {
    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Show plan, subscription and today's usage
    Status,
    /// Show the limits that apply to you
    Limits,
    /// Ask whether an action would be allowed, without counting it
    Check(MeteredArgs),
    /// Count one action against today's quota
    Use(MeteredArgs),
    /// Start a Pro subscription
    Subscribe {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        phone: Option<String>,
    },
    /// Cancel the current subscription
    Cancel {
        #[arg(long)]
        reason: Option<String>,
    },
    /// Store credentials issued by the StudyBuddy app
    Login {
        #[arg(long)]
        token: String,
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        email: Option<String>,
    },
    /// Forget stored credentials and go back to guest mode
    Logout,
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct MeteredArgs {
    /// doubts, questions, notes or flashcards
    pub feature: Feature,
    /// Items in the generated set (questions and flashcards)
    #[arg(short = 'n', long)]
    pub count: Option<u32>,
    #[arg(short, long)]
    pub difficulty: Option<Difficulty>,
    /// Note length (notes only)
    #[arg(short, long)]
    pub length: Option<NoteLength>,
}

impl MeteredArgs {
    pub fn to_request(&self) -> MeteredRequest {
        let mut request = MeteredRequest::new(self.feature);
        if let Some(count) = self.count {
            request = request.with_question_count(count);
        }
        if let Some(difficulty) = self.difficulty {
            request = request.with_difficulty(difficulty);
        }
        if let Some(length) = self.length {
            request = request.with_note_length(length);
        }
        request
    }
}

/// Everything `status` prints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub identity: Identity,
    pub tier: Option<PlanTier>,
    pub subscription_status: Option<SubscriptionStatus>,
    pub usage: Vec<FeatureUsage>,
    /// Set when the figures come from cache because the server could not be reached.
    pub stale_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeatureUsage {
    pub feature: Feature,
    pub used: u32,
    pub limit: u32,
}

pub fn render_status(report: &StatusReport) -> String {
    let mut out = String::new();
    match &report.identity {
        Identity::Guest { .. } => out.push_str("Signed out (guest)\n"),
        Identity::User { user_id } => {
            let tier = report.tier.unwrap_or_default();
            out.push_str(&format!("Signed in as {} - {}", user_id, tier.display_name()));
            if let Some(status) = report.subscription_status {
                out.push_str(&format!(" ({})", status));
            }
            out.push('\n');
        }
    }
    if let Some(reason) = &report.stale_reason {
        out.push_str(&format!("Showing cached figures: {}\n", reason));
    }
    out.push_str("\nToday:\n");
    for usage in &report.usage {
        out.push_str(&format!(
            "  {:<12} {:>3} / {}\n",
            usage.feature.display_name(),
            usage.used,
            usage.limit
        ));
    }
    out
}

pub fn render_limits(label: &str, limits: &PlanLimits) -> String {
    let mut out = format!("{}\n", label);
    for feature in Feature::ALL {
        out.push_str(&format!(
            "  {:<12} {} per day\n",
            feature.display_name(),
            limits.quota(feature)
        ));
    }
    out.push_str(&format!(
        "  Questions per set: up to {}\n",
        limits.max_questions_per_set
    ));
    let difficulties: Vec<String> = limits
        .difficulties
        .iter()
        .map(|d| format!("{:?}", d).to_lowercase())
        .collect();
    out.push_str(&format!("  Difficulty: {}\n", difficulties.join(", ")));
    let lengths: Vec<String> = limits
        .note_lengths
        .iter()
        .map(|l| format!("{:?}", l).to_lowercase())
        .collect();
    out.push_str(&format!("  Note length: {}\n", lengths.join(", ")));
    out
}

pub fn render_decision(feature: Feature, decision: &Decision) -> String {
    if decision.allowed {
        return format!(
            "{}: allowed ({} of {} left today)",
            feature.display_name(),
            decision.remaining(),
            decision.limit
        );
    }

    let mut out = format!("{}: not allowed", feature.display_name());
    for violation in &decision.violations {
        out.push_str(&format!("\n  [{}] {}", violation.code(), violation.message()));
    }
    if decision.suggests_upgrade() {
        out.push_str("\n  Run `studybuddy subscribe` to upgrade to Pro.");
    }
    out
}

/// One line for the terminal, with the stable code up front.
pub fn render_error(err: &StudyError) -> String {
    match err {
        StudyError::PaymentCapturedNotVerified {
            payment_id,
            provider_subscription_id,
            ..
        } => format!(
            "[{}] Your payment went through but we could not confirm it.\n\
             Do not pay again. Contact support with payment id {} (subscription {}).",
            err.code(),
            payment_id,
            provider_subscription_id
        ),
        StudyError::NotSignedIn => format!(
            "[{}] Sign in first with `studybuddy login`.",
            err.code()
        ),
        other => format!("[{}] {}", other.code(), other),
    }
}

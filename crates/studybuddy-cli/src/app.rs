use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use studybuddy_cloud::{
    CheckoutConfig, CheckoutOptions, CloudClient, CloudCredentials, PaymentAuthorization,
    PaymentGateway, PaymentRejection, SubscriptionFlow, UserData,
};
use studybuddy_core::{
    CancelSource, CancelToken, Feature, FileStore, GuestUsageStore, Identity, KeyValueStore,
    LocalClock, PlanPolicy, PlanStateMachine, QuotaGate, Reservation, Settings, StudyError,
    UsageClock,
};

use crate::commands::{
    render_decision, render_limits, render_status, Cli, Command, FeatureUsage, StatusReport,
};

/// Everything one invocation needs, wired once.
struct Session {
    settings: Settings,
    client: Arc<CloudClient>,
    guest: Arc<GuestUsageStore>,
    plan: Arc<PlanStateMachine>,
    gate: QuotaGate,
    identity: Identity,
    json: bool,
}

impl Session {
    fn open(settings: Settings, json: bool) -> Result<Self> {
        let store: Arc<dyn KeyValueStore> = Arc::new(match settings.data_dir() {
            Some(dir) => FileStore::with_dir(dir)?,
            None => FileStore::new()?,
        });
        let creds = CloudCredentials::load();
        let identity = creds.identity(store.as_ref());
        tracing::debug!("Session identity: {}", identity.label());

        let client = Arc::new(CloudClient::new(&settings, &creds)?);
        let clock: Arc<dyn UsageClock> = Arc::new(LocalClock);
        let policy = Arc::new(PlanPolicy::standard());
        let guest = Arc::new(GuestUsageStore::new(
            store.clone(),
            clock.clone(),
            policy.guest_fallback().clone(),
        ));
        let plan = Arc::new(
            PlanStateMachine::new(client.clone(), clock)
                .with_timeout(settings.request_timeout())
                .with_storage(store),
        );
        let gate = QuotaGate::new(policy, guest.clone(), plan.clone());

        Ok(Self {
            settings,
            client,
            guest,
            plan,
            gate,
            identity,
            json,
        })
    }

    fn require_user(&self) -> Result<()> {
        if self.identity.is_guest() {
            return Err(StudyError::NotSignedIn.into());
        }
        Ok(())
    }

    /// Bring the relevant limits up to date. A failure leaves cached values in
    /// place and is returned as a note for the user.
    async fn sync(&self, cancel: &CancelToken) -> Option<String> {
        let result = match &self.identity {
            Identity::Guest { .. } => self
                .guest
                .refresh_limits(self.client.as_ref(), self.settings.request_timeout(), cancel)
                .await
                .map(|_| ()),
            Identity::User { .. } => self.plan.fetch_status_with(cancel).await.map(|_| ()),
        };
        result.err().map(|e| e.to_string())
    }

    /// Goes to stderr so `--json` output stays parseable.
    fn note_stale(&self, reason: &str) {
        tracing::warn!("Using cached limits: {}", reason);
        eprintln!("Could not reach StudyBuddy, using cached limits: {}", reason);
    }

    fn used_and_limit(&self, feature: Feature) -> (u32, u32) {
        let remaining = self.gate.remaining(&self.identity, feature);
        let limit = match &self.identity {
            Identity::Guest { .. } => self.guest.limit(feature),
            Identity::User { .. } => self.gate.user_limits().1.quota(feature),
        };
        (limit.saturating_sub(remaining), limit)
    }

    fn print_json<T: serde::Serialize>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }

    async fn status(&self, cancel: &CancelToken) -> Result<()> {
        let stale_reason = self.sync(cancel).await;
        let usage = Feature::ALL
            .iter()
            .map(|&feature| {
                let (used, limit) = self.used_and_limit(feature);
                FeatureUsage {
                    feature,
                    used,
                    limit,
                }
            })
            .collect();
        let report = StatusReport {
            identity: self.identity.clone(),
            tier: self.plan.tier(),
            subscription_status: self.plan.subscription_status(),
            usage,
            stale_reason,
        };

        if self.json {
            return self.print_json(&report);
        }
        print!("{}", render_status(&report));
        if let Some(status) = self.plan.snapshot() {
            if status.looks_lapsed(chrono::Utc::now()) {
                println!("\nYour billing period has ended; waiting for the server to confirm renewal.");
            }
        }
        Ok(())
    }

    async fn limits(&self, cancel: &CancelToken) -> Result<()> {
        if let Some(reason) = self.sync(cancel).await {
            self.note_stale(&reason);
        }
        let (label, limits) = match &self.identity {
            Identity::Guest { .. } => ("Guest limits".to_string(), self.guest.limits()),
            Identity::User { .. } => {
                let (tier, limits) = self.gate.user_limits();
                (format!("{} limits", tier.display_name()), limits)
            }
        };
        if self.json {
            return self.print_json(&limits);
        }
        print!("{}", render_limits(&label, &limits));
        Ok(())
    }

    async fn check(&self, args: &crate::commands::MeteredArgs, cancel: &CancelToken) -> Result<()> {
        if let Some(reason) = self.sync(cancel).await {
            self.note_stale(&reason);
        }
        let decision = self.gate.can_proceed(&self.identity, args.to_request())?;
        if self.json {
            return self.print_json(&decision);
        }
        println!("{}", render_decision(args.feature, &decision));
        Ok(())
    }

    async fn record(&self, args: &crate::commands::MeteredArgs, cancel: &CancelToken) -> Result<()> {
        if let Some(reason) = self.sync(cancel).await {
            self.note_stale(&reason);
        }
        match self.gate.reserve(&self.identity, args.to_request())? {
            Reservation::Granted(permit) => {
                permit.commit();
                let (used, limit) = self.used_and_limit(args.feature);
                if self.json {
                    return self.print_json(&FeatureUsage {
                        feature: args.feature,
                        used,
                        limit,
                    });
                }
                println!(
                    "{}: counted, {} of {} used today.",
                    args.feature.display_name(),
                    used,
                    limit
                );
                if !self.identity.is_guest() {
                    println!(
                        "This count is provisional and kept on this device until the next sync, \
                         when the server's own count replaces it."
                    );
                }
            }
            Reservation::Denied(decision) => {
                if self.json {
                    return self.print_json(&decision);
                }
                println!("{}", render_decision(args.feature, &decision));
            }
        }
        Ok(())
    }

    fn flow(&self) -> Result<SubscriptionFlow> {
        let checkout = CheckoutConfig::from_settings(&self.settings)?;
        Ok(SubscriptionFlow::new(
            self.client.clone(),
            Arc::new(TerminalGateway),
            self.plan.clone(),
            checkout,
        )
        .with_timeouts(self.settings.request_timeout(), self.settings.payment_timeout()))
    }

    async fn subscribe(&self, user: UserData, cancel: &CancelToken) -> Result<()> {
        self.require_user()?;
        let flow = self.flow()?;
        if let Some(reason) = self.sync(cancel).await {
            tracing::warn!("Subscribing without a fresh plan status: {}", reason);
        }

        let outcome = flow.subscribe(&user, cancel).await?;
        if self.json {
            return self.print_json(&outcome.subscription);
        }
        println!("Payment {} confirmed.", outcome.payment_id);
        if let Some(ends) = outcome.subscription.trial_ends_at {
            println!(
                "Trial runs until {}.",
                ends.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M")
            );
        }
        if outcome.status_refreshed {
            println!(
                "You're on {}.",
                self.plan.tier().unwrap_or_default().display_name()
            );
        } else {
            println!("Your plan will update shortly. Run `studybuddy status` to check.");
        }
        Ok(())
    }

    async fn cancel(&self, reason: Option<&str>, cancel: &CancelToken) -> Result<()> {
        self.require_user()?;
        let flow = self.flow()?;
        self.plan.fetch_status_with(cancel).await?;

        let outcome = flow.cancel_subscription(reason, cancel).await?;
        if self.json {
            return self.print_json(&outcome.status);
        }
        match (outcome.status_refreshed, outcome.status) {
            (true, Some(status)) => println!("Subscription is now {}.", status),
            _ => println!("Cancellation accepted. Run `studybuddy status` to see the update."),
        }
        Ok(())
    }

    fn logout(&self) -> Result<()> {
        CloudCredentials::clear()?;
        self.plan.clear();
        println!("Signed out. Usage is tracked on this device until you sign in again.");
        Ok(())
    }
}

/// Cancels `token` on Ctrl-C so in-flight requests are abandoned cleanly.
fn cancel_on_ctrl_c() -> CancelToken {
    let (source, token) = CancelSource::new();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, cancelling pending requests");
            source.cancel();
        }
    });
    token
}

pub async fn run(settings: Settings, cli: Cli) -> Result<()> {
    if let Command::Login {
        token,
        user_id,
        email,
    } = &cli.command
    {
        let creds = CloudCredentials {
            email: email.clone(),
            user_id: Some(user_id.clone()),
            api_token: Some(token.clone()),
        };
        creds.save()?;
        println!("Signed in as {}.", user_id);
        return Ok(());
    }

    let session = Session::open(settings, cli.json)?;
    let cancel = cancel_on_ctrl_c();

    match &cli.command {
        Command::Status => session.status(&cancel).await,
        Command::Limits => session.limits(&cancel).await,
        Command::Check(args) => session.check(args, &cancel).await,
        Command::Use(args) => session.record(args, &cancel).await,
        Command::Subscribe { name, email, phone } => {
            let mut user = UserData::new(name, email, session.settings.payment.plan_id.clone());
            if let Some(phone) = phone {
                user = user.with_phone(phone);
            }
            session.subscribe(user, &cancel).await
        }
        Command::Cancel { reason } => session.cancel(reason.as_deref(), &cancel).await,
        Command::Logout => session.logout(),
        Command::Login { .. } => Ok(()),
    }
}

// ── Terminal payment sheet ───────────────────────────────────────────────

/// Stands in for the provider's checkout UI: the user pays in the provider's
/// hosted page and pastes back the payment id and signature it shows.
struct TerminalGateway;

async fn prompt(
    lines: &mut Lines<BufReader<Stdin>>,
    label: &str,
) -> std::result::Result<String, PaymentRejection> {
    print!("{}", label);
    std::io::stdout()
        .flush()
        .map_err(|e| PaymentRejection::Provider(e.to_string()))?;
    match lines.next_line().await {
        Ok(Some(line)) => Ok(line.trim().to_string()),
        Ok(None) => Err(PaymentRejection::Dismissed),
        Err(e) => Err(PaymentRejection::Provider(e.to_string())),
    }
}

#[async_trait]
impl PaymentGateway for TerminalGateway {
    async fn open(
        &self,
        options: CheckoutOptions,
    ) -> std::result::Result<PaymentAuthorization, PaymentRejection> {
        println!(
            "{}: {}.{:02} {}",
            options.description,
            options.amount / 100,
            options.amount % 100,
            options.currency
        );
        println!(
            "Pay for subscription {} as {} <{}>, then paste the confirmation below.",
            options.provider_subscription_id, options.prefill.name, options.prefill.email
        );

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let payment_id = prompt(&mut lines, "Payment id (blank to cancel): ").await?;
        if payment_id.is_empty() {
            return Err(PaymentRejection::Dismissed);
        }
        let signature = prompt(&mut lines, "Signature: ").await?;
        if signature.is_empty() {
            return Err(PaymentRejection::Provider(
                "no signature returned by checkout".to_string(),
            ));
        }

        Ok(PaymentAuthorization {
            payment_id,
            provider_subscription_id: options.provider_subscription_id,
            signature,
        })
    }
}

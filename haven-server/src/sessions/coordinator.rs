//! Session Lifecycle Coordinator

use super::flow::{SessionFlow, SessionPhase};
use super::invite::{generate_invite_code, normalize_invite_code};
use super::repository::SessionRepository;
use crate::cleanup::CleanupQueue;
use crate::config::SessionSettings;
use crate::entitlements::{effective_plan, DenialReason, EntitlementResolver};
use crate::error::{Error, Result};
use crate::metering::UsageMeter;
use crate::video::VideoGateway;
use chrono::{DateTime, Duration, Utc};
use haven_common::db::{Session, SessionCompletionTrigger, SessionKind, SessionStatus};
use haven_common::events::{EventBus, HavenEvent};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

const INVITE_CODE_ATTEMPTS: usize = 5;

/// Result of a start request
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StartOutcome {
    Started {
        session: Session,
        phase: SessionPhase,
    },
    Denied {
        reason: DenialReason,
        message: &'static str,
        phase: SessionPhase,
    },
}

/// Result of a completion request
#[derive(Debug, Clone, Serialize)]
pub struct CompletionOutcome {
    pub session: Session,
    /// False when the session had already been completed
    pub newly_completed: bool,
}

pub struct SessionCoordinator {
    resolver: Arc<EntitlementResolver>,
    meter: Arc<UsageMeter>,
    repository: SessionRepository,
    video: Arc<VideoGateway>,
    cleanup: CleanupQueue,
    events: EventBus,
    settings: SessionSettings,
}

impl SessionCoordinator {
    pub fn new(
        resolver: Arc<EntitlementResolver>,
        meter: Arc<UsageMeter>,
        repository: SessionRepository,
        video: Arc<VideoGateway>,
        cleanup: CleanupQueue,
        events: EventBus,
        settings: SessionSettings,
    ) -> Self {
        Self {
            resolver,
            meter,
            repository,
            video,
            cleanup,
            events,
            settings,
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.resolver.clock().now()
    }

    /// Run the gates for `kind`, reserving a solo slot when they pass
    ///
    /// The reservation is the last step so a denial never consumes one.
    async fn check_gates(&self, user_id: &str, kind: SessionKind) -> Result<Option<DenialReason>> {
        if kind == SessionKind::Group && !self.resolver.can_start_group_session(user_id).await? {
            return Ok(Some(DenialReason::GroupSessionsUnavailable));
        }

        if !self
            .resolver
            .can_consume_metered_minutes(user_id, self.settings.min_minutes_to_start)
            .await?
        {
            return Ok(Some(DenialReason::MinutesExhausted));
        }

        if kind == SessionKind::Solo && !self.meter.try_start_solo_session(user_id).await? {
            return Ok(Some(DenialReason::SoloSessionLimitReached));
        }

        Ok(None)
    }

    pub async fn start_session(&self, user_id: &str, kind: SessionKind) -> Result<StartOutcome> {
        let mut flow = SessionFlow::new();
        flow.begin()?;

        if let Some(reason) = self.check_gates(user_id, kind).await? {
            flow.gate_denied(reason)?;
            info!(user_id = %user_id, kind = %kind, reason = reason.code(), "Session start denied");
            self.events.emit_lossy(HavenEvent::QuotaDenied {
                user_id: user_id.to_string(),
                reason: reason.code().to_string(),
                timestamp: self.now(),
            });
            return Ok(StartOutcome::Denied {
                reason,
                message: reason.message(),
                phase: flow.phase(),
            });
        }
        flow.gate_passed()?;

        let session_id = Uuid::new_v4();
        let name = match kind {
            SessionKind::Solo => "Haven reflection",
            SessionKind::Group => "Haven conversation",
        };
        let conversation = self.video.start_conversation(session_id, name).await;
        flow.provider_ready()?;

        let started_at = self.now();
        let mut session = Session {
            id: session_id,
            kind,
            status: SessionStatus::Active,
            creator_id: user_id.to_string(),
            invite_code: None,
            invite_expires_at: None,
            conversation_id: Some(conversation.conversation_id),
            conversation_url: Some(conversation.conversation_url),
            fallback_mode: conversation.fallback_mode,
            max_duration_minutes: self.video.max_duration_minutes(),
            minutes_consumed: 0,
            started_at,
            ended_at: None,
            completion_trigger: None,
            participants: Vec::new(),
        };

        if let Err(e) = self.persist_new_session(&mut session).await {
            self.undo_failed_start(&session).await;
            return Err(e);
        }

        info!(
            session_id = %session_id,
            user_id = %user_id,
            kind = %kind,
            fallback_mode = session.fallback_mode,
            "Session active"
        );
        self.events.emit_lossy(HavenEvent::SessionStarted {
            session_id,
            user_id: user_id.to_string(),
            kind,
            fallback_mode: session.fallback_mode,
            timestamp: started_at,
        });

        let session = self
            .repository
            .get(session_id)
            .await?
            .ok_or_else(|| Error::Internal(format!("session {} vanished after insert", session_id)))?;

        Ok(StartOutcome::Started {
            session,
            phase: flow.phase(),
        })
    }

    /// Return what a start took before its session row could be written
    ///
    /// The solo reservation is released and a live conversation is queued
    /// for ending. Failures here are logged; the caller reports the original
    /// error.
    async fn undo_failed_start(&self, session: &Session) {
        warn!(session_id = %session.id, user_id = %session.creator_id, "Session could not be saved, releasing reservation");

        if session.kind == SessionKind::Solo {
            if let Err(e) = self.meter.release_solo_session(&session.creator_id).await {
                warn!(session_id = %session.id, error = %e, "Could not release solo session reservation");
            }
        }

        if !session.fallback_mode {
            if let Some(conversation_id) = session.conversation_id.clone() {
                self.end_conversation_later(conversation_id);
            }
        }
    }

    fn end_conversation_later(&self, conversation_id: String) {
        let video = self.video.clone();
        self.cleanup.submit(format!("end conversation {}", conversation_id), async move {
            video
                .end_conversation(&conversation_id)
                .await
                .map_err(|e| Error::Provider(e.to_string()))
        });
    }

    /// Insert, drawing a fresh invite code on collision
    async fn persist_new_session(&self, session: &mut Session) -> Result<()> {
        if session.kind == SessionKind::Solo {
            if self.repository.insert_with_host(session).await? {
                return Ok(());
            }
            return Err(Error::Internal(format!("session id {} already exists", session.id)));
        }

        session.invite_expires_at =
            Some(session.started_at + Duration::hours(self.settings.invite_ttl_hours));
        for attempt in 1..=INVITE_CODE_ATTEMPTS {
            session.invite_code = Some(generate_invite_code(&mut rand::thread_rng()));
            if self.repository.insert_with_host(session).await? {
                return Ok(());
            }
            debug!(attempt, "Invite code collision, drawing another");
        }

        Err(Error::Internal("could not allocate a unique invite code".to_string()))
    }

    /// Join a group session by invite code
    ///
    /// The joiner needs an available subscription on any plan; the group
    /// entitlement belongs to the creator.
    pub async fn join_session(&self, user_id: &str, invite_code: &str) -> Result<Session> {
        let code = normalize_invite_code(invite_code)
            .ok_or_else(|| Error::Validation("Invite codes are 8 letters or digits".to_string()))?;

        self.resolver.require_subscription(user_id).await?;

        let session = self
            .repository
            .find_by_invite_code(&code)
            .await?
            .ok_or_else(|| Error::NotFound(format!("No session for invite code {}", code)))?;

        if session.status != SessionStatus::Active {
            return Err(Error::Validation("This session has already ended".to_string()));
        }
        if session.invite_expires_at.is_some_and(|expires| expires <= self.now()) {
            return Err(Error::Validation("This invite code has expired".to_string()));
        }

        if session.creator_id != user_id {
            self.repository
                .add_participant(session.id, user_id, self.now())
                .await?;
            info!(session_id = %session.id, user_id = %user_id, "Joined group session");
        }

        self.repository
            .get(session.id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Session {}", session.id)))
    }

    /// Session visible to `user_id` (creator or participant)
    pub async fn get_session(&self, user_id: &str, session_id: Uuid) -> Result<Session> {
        let session = self
            .repository
            .get(session_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Session {}", session_id)))?;

        let visible = session.creator_id == user_id
            || session.participants.iter().any(|p| p.user_id == user_id);
        if !visible {
            return Err(Error::NotFound(format!("Session {}", session_id)));
        }
        Ok(session)
    }

    /// Sessions within the plan's history window, newest first
    pub async fn list_sessions(&self, user_id: &str) -> Result<Vec<Session>> {
        let sub = self.resolver.require_subscription(user_id).await?;
        let retention_days = effective_plan(&sub).features.history_retention_days;
        let since = self.now() - Duration::days(i64::from(retention_days));
        self.repository.list_for_user(user_id, since).await
    }

    /// Complete a session; repeated calls return the stored terminal state
    ///
    /// Only the creator's completion ends the session. Minutes are billed to
    /// the creator once: elapsed time rounded up, capped at the session's
    /// maximum duration.
    pub async fn complete_session(
        &self,
        user_id: &str,
        session_id: Uuid,
        trigger: SessionCompletionTrigger,
    ) -> Result<CompletionOutcome> {
        let session = self.get_session(user_id, session_id).await?;

        if session.creator_id != user_id || session.status != SessionStatus::Active {
            return Ok(CompletionOutcome {
                session,
                newly_completed: false,
            });
        }

        let ended_at = self.now();
        let minutes = consumed_minutes(session.started_at, ended_at, session.max_duration_minutes);

        let applied = self
            .repository
            .mark_completed(session_id, ended_at, minutes, trigger)
            .await?;

        if applied {
            info!(
                session_id = %session_id,
                user_id = %user_id,
                minutes,
                trigger = %trigger,
                "Session completed"
            );

            if let Err(e) = self.meter.record_minutes_consumed(user_id, minutes).await {
                warn!(session_id = %session_id, error = %e, "Could not record consumed minutes");
            }

            if !session.fallback_mode {
                if let Some(conversation_id) = session.conversation_id.clone() {
                    self.end_conversation_later(conversation_id);
                }
            }

            self.events.emit_lossy(HavenEvent::SessionCompleted {
                session_id,
                user_id: user_id.to_string(),
                minutes_consumed: minutes,
                trigger,
                timestamp: ended_at,
            });
        } else {
            debug!(session_id = %session_id, "Session already completed by a concurrent call");
        }

        let session = self
            .repository
            .get(session_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Session {}", session_id)))?;

        Ok(CompletionOutcome {
            session,
            newly_completed: applied,
        })
    }

    /// Fire-and-forget completion for unload signals
    ///
    /// Returns whether the work was queued; the outcome is only logged.
    pub fn complete_in_background(
        self: &Arc<Self>,
        user_id: &str,
        session_id: Uuid,
        trigger: SessionCompletionTrigger,
    ) -> bool {
        let coordinator = Arc::clone(self);
        let user_id = user_id.to_string();
        self.cleanup.submit(format!("complete session {}", session_id), async move {
            coordinator
                .complete_session(&user_id, session_id, trigger)
                .await
                .map(|_| ())
        })
    }

    /// Provider-side status of the session's conversation
    pub async fn conversation_status(
        &self,
        user_id: &str,
        session_id: Uuid,
    ) -> Result<crate::video::ConversationStatus> {
        let session = self.get_session(user_id, session_id).await?;
        let conversation_id = session
            .conversation_id
            .ok_or_else(|| Error::NotFound(format!("Conversation for session {}", session_id)))?;

        self.video
            .conversation_status(&conversation_id)
            .await
            .map_err(|e| Error::Provider(e.to_string()))
    }
}

/// Whole minutes between start and end, rounded up and capped
pub fn consumed_minutes(started_at: DateTime<Utc>, ended_at: DateTime<Utc>, cap: u32) -> u32 {
    let seconds = (ended_at - started_at).num_seconds();
    if seconds <= 0 {
        return 0;
    }
    let minutes = (seconds + 59) / 60;
    minutes.min(i64::from(cap)) as u32
}

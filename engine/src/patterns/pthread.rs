use hindsight_core::{EventIdx, EventPayload, LockParadigm};

use crate::{
    cbdata::CbData,
    errors::DetectorError,
    patterns::{ids, Mode, Pattern, PatternMeta, SeverityMap},
    replay::{ReplayPhase, UserEvent},
};

// PTHREAD LOCK PATTERNS
// ================================================================================================

/// Pthread lock contention: time a thread spent acquiring a mutex or waiting on a condition
/// variable because another thread held the lock.
///
/// The severity is the span between entering the acquiring call and the previous holder's
/// release, clamped at zero. Unknown lock paradigms short-circuit to a no-op.
#[derive(Default)]
pub struct PthreadLockPatterns {
    mutex: SeverityMap,
    condition: SeverityMap,
}

impl Pattern for PthreadLockPatterns {
    fn meta(&self) -> PatternMeta {
        PatternMeta {
            id: ids::PTHREAD_MUTEX_CONTENTION,
            parent: None,
            name: "Pthread Mutex Contention",
            unique_name: "pthread_mutex_contention",
            description: "Time spent acquiring contended Pthread mutexes",
            unit: "sec",
            mode: Mode::Exclusive,
            hidden: false,
        }
    }

    fn subscriptions(&self) -> Vec<(ReplayPhase, UserEvent)> {
        vec![(ReplayPhase::MainForward, UserEvent::ThreadAcquireLock)]
    }

    fn notifies(&self, phase: ReplayPhase) -> &'static [UserEvent] {
        match phase {
            ReplayPhase::MainForward => &[UserEvent::ThreadLockContention],
            _ => &[],
        }
    }

    fn handle(
        &mut self,
        _phase: ReplayPhase,
        _user_event: UserEvent,
        at: EventIdx,
        data: &mut CbData<'_>,
    ) -> Result<(), DetectorError> {
        let EventPayload::ThreadLock { lock, paradigm } = *data.payload_of(at) else {
            return Ok(());
        };
        let map = match paradigm {
            LockParadigm::PthreadMutex => &mut self.mutex,
            LockParadigm::PthreadCondvar => &mut self.condition,
            _ => return Ok(()),
        };
        let ev = data.event(at);
        let Some(last_release) = data.locks.last_release_before(lock, data.location(), ev.time())
        else {
            return Ok(());
        };
        let idle = (last_release - ev.enclosing_enter_time()).max(0.0);
        if idle > 0.0 {
            map.add(data.callpath_of(at), idle);
            data.idle = idle;
            data.notify(UserEvent::ThreadLockContention, at);
        }
        Ok(())
    }

    fn severities(&self) -> &SeverityMap {
        &self.mutex
    }

    fn results(&self) -> Vec<(PatternMeta, SeverityMap)> {
        vec![
            (self.meta(), self.mutex.clone()),
            (
                PatternMeta {
                    id: ids::PTHREAD_CONDITION_CONTENTION,
                    parent: None,
                    name: "Pthread Condition Contention",
                    unique_name: "pthread_condition_contention",
                    description: "Time spent in contended Pthread condition-variable waits",
                    unit: "sec",
                    mode: Mode::Exclusive,
                    hidden: false,
                },
                self.condition.clone(),
            ),
        ]
    }
}

use hindsight_core::{EventIdx, EventPayload};

use crate::{
    cbdata::CbData,
    errors::DetectorError,
    patterns::{ids, Mode, Pattern, PatternMeta, SeverityMap},
    replay::{ReplayPhase, UserEvent},
};

// COUNT PATTERNS
// ================================================================================================

/// Base count metrics, accumulated on the dedicated counting sweep: synchronization and
/// communication operation counts (zero-sized transfers count as synchronizations) and bytes
/// transferred.
#[derive(Default)]
pub struct CountPatterns {
    syncs_send: SeverityMap,
    syncs_recv: SeverityMap,
    syncs_coll: SeverityMap,
    comms_send: SeverityMap,
    comms_recv: SeverityMap,
    comms_coll: SeverityMap,
    bytes_sent: SeverityMap,
    bytes_rcvd: SeverityMap,
}

impl Pattern for CountPatterns {
    fn meta(&self) -> PatternMeta {
        PatternMeta {
            id: ids::SYNCS,
            parent: None,
            name: "Synchronizations",
            unique_name: "syncs",
            description: "Number of synchronization operations",
            unit: "occ",
            mode: Mode::Exclusive,
            hidden: false,
        }
    }

    fn subscriptions(&self) -> Vec<(ReplayPhase, UserEvent)> {
        use UserEvent::*;
        [SendStart, RecvComplete, SyncColl, Coll12n, CollN21, CollN2n, CollScan]
            .into_iter()
            .map(|ue| (ReplayPhase::ForwardCount, ue))
            .collect()
    }

    fn handle(
        &mut self,
        _phase: ReplayPhase,
        user_event: UserEvent,
        at: EventIdx,
        data: &mut CbData<'_>,
    ) -> Result<(), DetectorError> {
        let cp = data.callpath_of(at);
        match user_event {
            UserEvent::SendStart => {
                if let EventPayload::P2p { bytes, .. } = *data.payload_of(at) {
                    if bytes == 0 {
                        self.syncs_send.add(cp, 1.0);
                    } else {
                        self.comms_send.add(cp, 1.0);
                        self.bytes_sent.add(cp, bytes as f64);
                    }
                }
            },
            UserEvent::RecvComplete => {
                if let EventPayload::P2p { bytes, .. } = *data.payload_of(at) {
                    if bytes == 0 {
                        self.syncs_recv.add(cp, 1.0);
                    } else {
                        self.comms_recv.add(cp, 1.0);
                        self.bytes_rcvd.add(cp, bytes as f64);
                    }
                }
            },
            UserEvent::SyncColl => {
                self.syncs_coll.add(cp, 1.0);
            },
            UserEvent::Coll12n
            | UserEvent::CollN21
            | UserEvent::CollN2n
            | UserEvent::CollScan => {
                self.comms_coll.add(cp, 1.0);
                if let EventPayload::Collective { bytes_out, bytes_in, .. } = *data.payload_of(at)
                {
                    self.bytes_sent.add(cp, bytes_out as f64);
                    self.bytes_rcvd.add(cp, bytes_in as f64);
                }
            },
            _ => {},
        }
        Ok(())
    }

    fn severities(&self) -> &SeverityMap {
        &self.syncs_send
    }

    fn results(&self) -> Vec<(PatternMeta, SeverityMap)> {
        let entry = |id, parent, name, unique_name, description, unit, map: &SeverityMap| {
            (
                PatternMeta {
                    id,
                    parent,
                    name,
                    unique_name,
                    description,
                    unit,
                    mode: Mode::Exclusive,
                    hidden: false,
                },
                map.clone(),
            )
        };
        vec![
            entry(
                ids::SYNCS_SEND,
                Some(ids::SYNCS),
                "P2P Send Synchronizations",
                "syncs_send",
                "Number of zero-sized sends",
                "occ",
                &self.syncs_send,
            ),
            entry(
                ids::SYNCS_RECV,
                Some(ids::SYNCS),
                "P2P Recv Synchronizations",
                "syncs_recv",
                "Number of zero-sized receives",
                "occ",
                &self.syncs_recv,
            ),
            entry(
                ids::SYNCS_COLL,
                Some(ids::SYNCS),
                "Collective Synchronizations",
                "syncs_coll",
                "Number of barrier-style collective operations",
                "occ",
                &self.syncs_coll,
            ),
            entry(
                ids::COMMS_SEND,
                Some(ids::COMMS),
                "P2P Send Communications",
                "comms_send",
                "Number of sends transferring data",
                "occ",
                &self.comms_send,
            ),
            entry(
                ids::COMMS_RECV,
                Some(ids::COMMS),
                "P2P Recv Communications",
                "comms_recv",
                "Number of receives transferring data",
                "occ",
                &self.comms_recv,
            ),
            entry(
                ids::COMMS_COLL,
                Some(ids::COMMS),
                "Collective Communications",
                "comms_coll",
                "Number of data-transferring collective operations",
                "occ",
                &self.comms_coll,
            ),
            entry(
                ids::BYTES_SENT,
                Some(ids::BYTES),
                "Bytes Sent",
                "bytes_sent",
                "Bytes leaving this location",
                "bytes",
                &self.bytes_sent,
            ),
            entry(
                ids::BYTES_RCVD,
                Some(ids::BYTES),
                "Bytes Received",
                "bytes_rcvd",
                "Bytes arriving at this location",
                "bytes",
                &self.bytes_rcvd,
            ),
        ]
    }
}

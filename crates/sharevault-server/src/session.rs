//! Per-connection session handlers.
//!
//! A session opens with `(user_id:i32, indicator:i32)` and dispatches on
//! the indicator. Upload sessions loop META → STAT → DATA rounds until the
//! client closes; download sessions stream the restored share file back in
//! RESP_DOWNLOAD packets. The three peer indicators serve the same engine
//! operations to other nodes; the mediator pins them local in this
//! deployment, so they run against the local engine directly.

use std::io::Write;
use std::net::TcpStream;

use tracing::{debug, trace};

use sharevault_dedup::{DedupCore, DedupError};
use sharevault_proto::{wire, Fingerprint, Indicator, ProtoError, UserId, FP_SIZE, PACKET_HEADER_SIZE};

use crate::error::ServerError;

/// Buffer for one fragment's metadata.
pub const META_BUFFER_LEN: usize = 2 << 20;
/// Buffer for one fragment's share data.
pub const DATA_BUFFER_LEN: usize = 4 << 20;
/// Buffer for the restored share file between flushes.
pub const SHARE_FILE_BUFFER_LEN: usize = 4 << 20;

/// Longest accepted file name in a download request.
const MAX_FILE_NAME_LEN: usize = 64 << 10;

/// Serve one accepted connection to completion.
pub fn serve_connection(mut stream: TcpStream, core: &DedupCore) -> Result<(), ServerError> {
    let Some(user_id) = wire::probe_user_id(&mut stream)? else {
        return Ok(());
    };
    let indicator = wire::read_indicator(&mut stream)?;
    trace!(user_id, ?indicator, "session opened");
    match indicator {
        Indicator::Meta => upload_session(stream, core, user_id),
        Indicator::Download => download_session(stream, core, user_id),
        Indicator::IntraUserShareIdxUpdate => peer_intra_session(stream, core, user_id),
        Indicator::InterUserShareIdxUpdate => peer_inter_session(stream, core, user_id),
        Indicator::RestoreShare => peer_restore_session(stream, core, user_id),
        other => Err(ProtoError::BadIndicator(other.as_i32()).into()),
    }
}

/// META → STAT → DATA rounds until the client closes the socket.
fn upload_session(
    mut stream: TcpStream,
    core: &DedupCore,
    user_id: UserId,
) -> Result<(), ServerError> {
    let mut meta_buf = vec![0u8; META_BUFFER_LEN];
    let mut data_buf = vec![0u8; DATA_BUFFER_LEN];

    loop {
        // META payload: [num_of_total_shares:u32 ‖ meta bytes], the count
        // included in the declared packet size
        let packet_size = wire::read_u32(&mut stream)? as usize;
        if packet_size < 4 {
            return Err(ProtoError::Truncated {
                what: "meta packet",
                need: 4,
                have: packet_size,
            }
            .into());
        }
        let total_shares = wire::read_u32(&mut stream)? as usize;
        let meta_size = packet_size - 4;
        wire::read_payload(&mut stream, &mut meta_buf, meta_size)?;

        let dup_status = core.first_stage_dedup(user_id, &meta_buf[..meta_size])?;

        let stat: Vec<u8> = dup_status.iter().map(|dup| *dup as u8).collect();
        wire::write_packet(&mut stream, Indicator::Stat, &stat)?;

        // DATA carries only the payloads of shares the first stage did not
        // already attribute to this user
        let data_user = wire::read_i32(&mut stream)?;
        if data_user != user_id {
            return Err(ProtoError::UserMismatch {
                expected: user_id,
                actual: data_user,
            }
            .into());
        }
        wire::expect_indicator(&mut stream, Indicator::Data)?;
        let data_size = wire::read_u32(&mut stream)? as usize;
        wire::read_payload(&mut stream, &mut data_buf, data_size)?;

        core.second_stage_dedup(
            user_id,
            &meta_buf[..meta_size],
            &data_buf[..data_size],
            &dup_status,
            total_shares,
        )?;

        match wire::probe_user_id(&mut stream)? {
            None => {
                debug!(user_id, "upload session closed");
                return Ok(());
            }
            Some(next_user) => {
                if next_user != user_id {
                    return Err(ProtoError::UserMismatch {
                        expected: user_id,
                        actual: next_user,
                    }
                    .into());
                }
                wire::expect_indicator(&mut stream, Indicator::Meta)?;
            }
        }
    }
}

/// Stream a restored share file back as RESP_DOWNLOAD packets.
fn download_session(
    mut stream: TcpStream,
    core: &DedupCore,
    user_id: UserId,
) -> Result<(), ServerError> {
    let name_size = wire::read_u32(&mut stream)? as usize;
    if name_size > MAX_FILE_NAME_LEN {
        return Err(ProtoError::PacketTooLarge {
            size: name_size as u64,
            limit: MAX_FILE_NAME_LEN as u64,
        }
        .into());
    }
    let mut name_buf = vec![0u8; name_size];
    wire::read_payload(&mut stream, &mut name_buf, name_size)?;
    let full_file_name =
        std::str::from_utf8(&name_buf).map_err(|_| ProtoError::BadFileNameEncoding)?;
    debug!(user_id, file = full_file_name, "download requested");

    let mut buf = vec![0u8; SHARE_FILE_BUFFER_LEN - PACKET_HEADER_SIZE];
    let out = &stream;
    core.restore_share_file(user_id, full_file_name, &mut buf, &mut |chunk| {
        let mut writer = out;
        wire::write_packet(&mut writer, Indicator::RespDownload, chunk)
            .map_err(DedupError::from)
    })?;
    stream.flush()?;
    Ok(())
}

/// Answer one intra-user ownership probe from a peer.
fn peer_intra_session(
    mut stream: TcpStream,
    core: &DedupCore,
    user_id: UserId,
) -> Result<(), ServerError> {
    let packet_size = wire::read_u32(&mut stream)? as usize;
    if packet_size != FP_SIZE {
        return Err(ProtoError::CountMismatch {
            what: "intra-user probe packet",
            declared: packet_size,
            actual: FP_SIZE,
        }
        .into());
    }
    let mut fp_buf = [0u8; FP_SIZE];
    wire::read_payload(&mut stream, &mut fp_buf, FP_SIZE)?;
    let owned = core.intra_user_index_update(&Fingerprint(fp_buf), user_id)?;
    wire::write_packet(
        &mut stream,
        Indicator::RespIntraUserShareIdxUpdate,
        &[owned as u8],
    )?;
    Ok(())
}

/// Store one share handed over by a peer. No response packet.
fn peer_inter_session(
    mut stream: TcpStream,
    core: &DedupCore,
    user_id: UserId,
) -> Result<(), ServerError> {
    let packet_size = wire::read_u32(&mut stream)? as usize;
    if packet_size < FP_SIZE {
        return Err(ProtoError::Truncated {
            what: "inter-user update packet",
            need: FP_SIZE,
            have: packet_size,
        }
        .into());
    }
    let mut fp_buf = [0u8; FP_SIZE];
    wire::read_payload(&mut stream, &mut fp_buf, FP_SIZE)?;
    let data_size = packet_size - FP_SIZE;
    if data_size > DATA_BUFFER_LEN {
        return Err(ProtoError::PacketTooLarge {
            size: data_size as u64,
            limit: DATA_BUFFER_LEN as u64,
        }
        .into());
    }
    let mut data = vec![0u8; data_size];
    wire::read_payload(&mut stream, &mut data, data_size)?;
    core.inter_user_index_update(&Fingerprint(fp_buf), user_id, &data)?;
    Ok(())
}

/// Restore one share for a peer.
fn peer_restore_session(
    mut stream: TcpStream,
    core: &DedupCore,
    _user_id: UserId,
) -> Result<(), ServerError> {
    let packet_size = wire::read_u32(&mut stream)? as usize;
    if packet_size != 8 + FP_SIZE {
        return Err(ProtoError::CountMismatch {
            what: "restore share packet",
            declared: packet_size,
            actual: 8 + FP_SIZE,
        }
        .into());
    }
    let share_size = wire::read_u64(&mut stream)? as usize;
    if share_size > DATA_BUFFER_LEN {
        return Err(ProtoError::PacketTooLarge {
            size: share_size as u64,
            limit: DATA_BUFFER_LEN as u64,
        }
        .into());
    }
    let mut fp_buf = [0u8; FP_SIZE];
    wire::read_payload(&mut stream, &mut fp_buf, FP_SIZE)?;
    let mut out = vec![0u8; share_size];
    core.restore_share(&Fingerprint(fp_buf), &mut out)?;
    wire::write_packet(&mut stream, Indicator::RespRestoreShare, &out)?;
    Ok(())
}

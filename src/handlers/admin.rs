use log::info;

use crate::error::SessionError;
use crate::protocol::{AdminAction, AdminActionRequest};
use crate::session::PollService;
use crate::ws::connection::ClientConnection;

// Role is not checked here: any member of the room may drive it.
pub async fn handle_admin_action(
    service: &PollService,
    conn: &ClientConnection,
    room: &str,
    request: AdminActionRequest,
) -> Result<(), SessionError> {
    let action: AdminAction = request.action.parse()?;
    info!("Admin action {} for poll {} from connection {}", action.as_str(), room, conn.id);
    service.apply_admin_action(room, action).await?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NotificationRow {
    pub id: String,
    pub recipient_id: String,
    pub actor_id: String,
    pub kind: String,
    pub entity_type: String,
    pub entity_id: String,
    pub message: String,
    pub is_read: bool,
    pub created_at: String,
}

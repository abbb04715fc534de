//! Typed header names for AMI frames.

define_header_enum! {
    /// Header names the client itself reads or writes.
    ///
    /// Payload headers of individual events are not listed here; the client
    /// is protocol-generic and looks those up by string. Use with
    /// [`AmiEvent::field()`](crate::AmiEvent::field) or
    /// [`AmiResponse::header()`](crate::AmiResponse::header).
    pub enum AmiHeader {
        Action => "Action",
        ActionId => "ActionID",
        Event => "Event",
        Response => "Response",
        Message => "Message",
        EventList => "EventList",
        Username => "Username",
        Secret => "Secret",
    }
}

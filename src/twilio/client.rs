use crate::config::TwilioConfig;

/// Per-call configuration threaded through the outbound webhook URL so the
/// resulting `start` event's `customParameters` carry it to C4.
pub struct NewCallParams<'a> {
    pub to_number: &'a str,
    pub from_number: &'a str,
    pub voice: &'a str,
    pub system_instructions: &'a str,
    pub call_instructions: &'a str,
}

impl NewCallParams<'_> {
    fn to_query_string(&self) -> String {
        [
            ("toNumber", self.to_number),
            ("fromNumber", self.from_number),
            ("voice", self.voice),
            ("systemInstructions", self.system_instructions),
            ("callInstructions", self.call_instructions),
        ]
        .iter()
        .map(|(k, v)| format!("{k}={}", urlencode(v)))
        .collect::<Vec<_>>()
        .join("&")
    }
}

fn urlencode(s: &str) -> String {
    s.bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                String::from(b as char)
            }
            _ => format!("%{b:02X}"),
        })
        .collect()
}

/// Twilio REST API client: originates calls and redirects live call legs
/// (hold, resume, hangup) by updating the call's webhook URL.
pub struct TwilioClient {
    client: reqwest::Client,
    account_sid: String,
    auth_token: String,
    from_number: String,
    external_url: String,
}

impl TwilioClient {
    pub fn new(twilio_config: &TwilioConfig, external_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            account_sid: twilio_config.account_sid.clone(),
            auth_token: twilio_config.auth_token.clone(),
            from_number: twilio_config.phone_number.clone(),
            external_url: external_url.to_string(),
        }
    }

    /// Originate an outbound call. Twilio calls `to`, and on answer POSTs to
    /// our `/twilio/voice/outbound` webhook, which connects the media stream
    /// and re-attaches `params` as `customParameters` on the resulting
    /// `start` event (the call doesn't have a `call_id` yet — Twilio assigns
    /// the CallSid, which becomes the call_id, only once this returns).
    pub async fn originate(&self, to: &str, params: &NewCallParams<'_>) -> Result<String, ClientError> {
        let webhook_url = format!("{}/twilio/voice/outbound?{}", self.external_url, params.to_query_string());
        let call_sid = self.call_with_url(to, &webhook_url).await?;
        tracing::info!(to, call_sid = %call_sid, "outbound call originated");
        Ok(call_sid)
    }

    /// Redirect a live call leg to the hold webhook, which plays looping
    /// hold audio and does not open a new media stream.
    pub async fn redirect_to_hold(&self, call_sid: &str) -> Result<(), ClientError> {
        let webhook_url = format!("{}/twilio/voice/hold", self.external_url);
        self.redirect(call_sid, &webhook_url).await
    }

    /// Redirect a held call leg back to the media-stream webhook. No params
    /// are re-attached: the resulting `start` event's CallSid is unchanged,
    /// so C4 finds the existing Call record in C7 by that id directly.
    pub async fn redirect_to_resume(&self, call_sid: &str) -> Result<(), ClientError> {
        let webhook_url = format!("{}/twilio/voice/outbound", self.external_url);
        self.redirect(call_sid, &webhook_url).await
    }

    /// Redirects a live call leg through the DTMF webhook, which plays the
    /// digits in-band via `<Play digits>` and redirects back into the media
    /// stream once they finish. The only way to get real touch-tones onto a
    /// carrier leg that's inside a blocking `<Connect><Stream>` is to briefly
    /// leave it, same as hold/resume already do.
    pub async fn send_digits(&self, call_sid: &str, digits: &str) -> Result<(), ClientError> {
        let webhook_url = format!("{}/twilio/voice/dtmf?digits={}", self.external_url, urlencode(digits));
        self.redirect(call_sid, &webhook_url).await
    }

    pub async fn hangup(&self, call_sid: &str) -> Result<(), ClientError> {
        let url = self.calls_url(call_sid);
        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("Status", "completed")])
            .send()
            .await
            .map_err(|e| ClientError::Request(e.to_string()))?;
        Self::check_status(resp).await
    }

    async fn redirect(&self, call_sid: &str, webhook_url: &str) -> Result<(), ClientError> {
        let url = self.calls_url(call_sid);
        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("Url", webhook_url), ("Method", "POST")])
            .send()
            .await
            .map_err(|e| ClientError::Request(e.to_string()))?;
        Self::check_status(resp).await
    }

    async fn call_with_url(&self, to: &str, webhook_url: &str) -> Result<String, ClientError> {
        let url = format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Calls.json",
            self.account_sid
        );
        let params = [("To", to), ("From", &self.from_number), ("Url", webhook_url)];

        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&params)
            .send()
            .await
            .map_err(|e| ClientError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::Api(format!("{status}: {body}")));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ClientError::Request(e.to_string()))?;
        Ok(body["sid"].as_str().unwrap_or("unknown").to_string())
    }

    fn calls_url(&self, call_sid: &str) -> String {
        format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Calls/{}.json",
            self.account_sid, call_sid
        )
    }

    async fn check_status(resp: reqwest::Response) -> Result<(), ClientError> {
        if resp.status().is_success() {
            Ok(())
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            Err(ClientError::Api(format!("{status}: {body}")))
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Request(String),
    #[error("Twilio API error: {0}")]
    Api(String),
}
